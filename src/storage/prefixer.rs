//! Logical ⇄ physical path mapping / 逻辑路径与物理路径映射

/// Prepends a root (and any chained sub-prefix) to logical paths, and strips it back off.
/// 为逻辑路径添加根目录前缀，或将其去除
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixer {
    prefix: String,
    separator: char,
}

impl PathPrefixer {
    pub fn new(prefix: &str, separator: char) -> Self {
        let trimmed = prefix.trim_end_matches(['/', '\\']);
        // "/" collapses to "" above, restore it so absolute roots survive
        let prefix = if !trimmed.is_empty() || prefix.starts_with(separator) {
            format!("{}{}", trimmed, separator)
        } else {
            String::new()
        };
        Self { prefix, separator }
    }

    /// Chain a sub-prefix below this one / 在当前前缀下追加子前缀
    pub fn chain(&self, sub_prefix: &str) -> Self {
        Self::new(&self.prefix_path(sub_prefix), self.separator)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn prefix_path(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path.trim_start_matches(['/', '\\']))
    }

    pub fn strip_prefix(&self, path: &str) -> String {
        path.get(self.prefix.len()..).unwrap_or("").to_string()
    }

    pub fn strip_directory_prefix(&self, path: &str) -> String {
        self.strip_prefix(path).trim_end_matches(['/', '\\']).to_string()
    }

    pub fn prefix_directory_path(&self, path: &str) -> String {
        let prefixed = self.prefix_path(path);
        let trimmed = prefixed.trim_end_matches(['/', '\\']);
        if self.prefix.is_empty() || path.is_empty() {
            trimmed.to_string()
        } else {
            format!("{}{}", trimmed, self.separator)
        }
    }
}
