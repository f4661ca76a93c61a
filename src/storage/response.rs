//! Streamed download responses / 流式下载响应

use std::io::{self, Write};

use crate::utils::fallback_name;

/// Content-Disposition type / 内容处置类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        }
    }
}

/// Build a Content-Disposition value with an ASCII fallback name
/// 构建带 ASCII 回退文件名的 Content-Disposition
pub fn make_disposition(disposition: Disposition, filename: &str) -> String {
    let fallback = fallback_name(filename);
    let quoted = fallback.replace('\\', "\\\\").replace('"', "\\\"");
    let mut value = format!("{}; filename=\"{}\"", disposition.as_str(), quoted);
    if fallback != filename {
        value.push_str(&format!("; filename*=utf-8''{}", urlencoding::encode(filename)));
    }
    value
}

/// HTTP response sink (framework side) / HTTP 响应接收端（由框架实现）
pub trait ResponseSink: Write {
    fn start(&mut self, status: u16, headers: &[(String, String)]) -> io::Result<()>;
}

type BodyCallback = Box<dyn FnOnce(&mut dyn Write) -> io::Result<u64> + Send>;

/// Response descriptor whose body is streamed on demand / 按需流式输出的响应描述
pub struct StreamedResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: BodyCallback,
}

impl StreamedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: BodyCallback) -> Self {
        Self { status, headers, body }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Case-insensitive header lookup / 不区分大小写的头部查找
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Stream the body into a writer, returns bytes written / 将响应体写入 writer
    pub fn write_body(self, out: &mut dyn Write) -> io::Result<u64> {
        (self.body)(out)
    }

    /// Send headers then body to a sink / 向接收端发送头部与响应体
    pub fn send<S: ResponseSink>(self, sink: &mut S) -> io::Result<u64> {
        sink.start(self.status, &self.headers)?;
        let written = (self.body)(&mut *sink)?;
        sink.flush()?;
        Ok(written)
    }
}

impl std::fmt::Debug for StreamedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_disposition() {
        assert_eq!(
            make_disposition(Disposition::Attachment, "report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
    }

    #[test]
    fn test_non_ascii_disposition() {
        assert_eq!(
            make_disposition(Disposition::Inline, "café 100%.txt"),
            "inline; filename=\"cafe 100.txt\"; filename*=utf-8''caf%C3%A9%20100%25.txt"
        );
    }

    #[test]
    fn test_quotes_are_escaped() {
        let value = make_disposition(Disposition::Attachment, "say \"hi\".txt");
        assert!(value.starts_with("attachment; filename=\"say \\\"hi\\\".txt\""));
    }

    #[test]
    fn test_header_lookup() {
        let response = StreamedResponse::new(
            200,
            vec![("Content-Type".into(), "text/plain".into())],
            Box::new(|_| Ok(0)),
        );
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.header("content-length"), None);
    }
}
