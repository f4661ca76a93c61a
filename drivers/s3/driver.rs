//! S3 adapter core / S3 适配器核心实现
//!
//! - Root is a key prefix, directories are placeholder objects
//! - Server-side copy, presigned temporary URLs
//! - Visibility: `x-amz-acl` on write plus an `x-amz-meta-visibility` marker read back by HEAD

use std::collections::BTreeSet;
use std::io::{Cursor, Read};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::serde_types::{HeadObjectResult, Part};
use s3::Region;

use super::config::S3Config;
use crate::storage::blocking::BlockingRuntime;
use crate::storage::{
    Entry, PathPrefixer, PublicUrlGenerator, ReadStream, StorageAdapter, TemporaryUrlGenerator,
    Visibility, WriteOptions,
};
use crate::utils::{basename, concat_path_to_url, dirname};

const VISIBILITY_META: &str = "visibility";
/// Longest expiry S3 accepts for SigV4 presigned URLs (7 days)
const MAX_PRESIGN_SECS: i64 = 7 * 24 * 3600;
/// Multipart part size, S3 needs at least 5MB for every part but the last
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

fn acl_for(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Public => "public-read",
        Visibility::Private => "private",
    }
}

/// Percent-encode each key segment, keeping the slashes / 逐段编码对象键
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Read until `buf` is full or the source ends, returns the bytes read
/// 读满一个分片或读到结尾
fn fill_chunk(contents: &mut dyn Read, buf: &mut Vec<u8>, limit: usize) -> std::io::Result<usize> {
    buf.clear();
    Read::take(&mut *contents, limit as u64).read_to_end(buf)
}

fn parse_listing_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub struct S3Adapter {
    config: S3Config,
    bucket: Box<Bucket>,
    prefixer: PathPrefixer,
    runtime: BlockingRuntime,
}

impl S3Adapter {
    pub fn new(config: S3Config, root: &str) -> Result<Self> {
        let bucket = Self::create_bucket(&config)?;
        Ok(Self {
            prefixer: PathPrefixer::new(root.trim_matches('/'), '/'),
            runtime: BlockingRuntime::new("s3")?,
            config,
            bucket,
        })
    }

    fn create_bucket(config: &S3Config) -> Result<Box<Bucket>> {
        if config.access_key_id.is_empty() || config.secret_access_key.is_empty() {
            return Err(anyhow!("missing access key or secret"));
        }
        let credentials = Credentials::new(
            Some(&config.access_key_id),
            Some(&config.secret_access_key),
            if config.session_token.is_empty() { None } else { Some(&config.session_token) },
            None,
            None,
        )
        .map_err(|e| anyhow!("Failed to create S3 credentials: {}", e))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint(),
        };
        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| anyhow!("Failed to create S3 bucket client: {}", e))?;

        Ok(if config.force_path_style { bucket.with_path_style() } else { bucket })
    }

    pub fn bucket_name(&self) -> &str {
        &self.config.bucket
    }

    fn key(&self, path: &str) -> String {
        self.prefixer.prefix_path(path)
    }

    /// Listing prefix of a directory, empty for the bucket root / 目录前缀
    fn dir_prefix(&self, path: &str) -> String {
        let key = self.key(path);
        let key = key.trim_end_matches('/');
        if key.is_empty() {
            String::new()
        } else {
            format!("{}/", key)
        }
    }

    fn logical(&self, key: &str) -> String {
        self.prefixer.strip_prefix(key).trim_end_matches('/').to_string()
    }

    fn is_placeholder(&self, key: &str) -> bool {
        basename(key) == self.config.placeholder
    }

    fn placeholder_key(&self, path: &str) -> String {
        format!("{}{}", self.dir_prefix(path), self.config.placeholder)
    }

    /// Bucket handle carrying extra request headers / 附带额外请求头的 bucket
    fn bucket_with_headers(&self, headers: &[(&str, &str)]) -> Box<Bucket> {
        let mut bucket = self.bucket.clone();
        for (name, value) in headers {
            bucket.add_header(name, value);
        }
        bucket
    }

    fn visibility_headers(&self, visibility: Visibility) -> Vec<(&'static str, &'static str)> {
        let mut headers = vec![("x-amz-meta-visibility", visibility.as_str())];
        if self.config.acl {
            headers.push(("x-amz-acl", acl_for(visibility)));
        }
        headers
    }

    /// HEAD an object, `None` on 404 / 获取对象元信息
    fn head(&self, key: &str) -> Result<Option<HeadObjectResult>> {
        match self.runtime.block_on(self.bucket.head_object(key)) {
            Ok((head, 200)) => Ok(Some(head)),
            Ok((_, 404)) => Ok(None),
            Ok((_, code)) => Err(anyhow!("S3 HEAD {} returned {}", key, code)),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Err(e) => Err(anyhow!("S3 HEAD {} failed: {}", key, e)),
        }
    }

    fn require(&self, path: &str) -> Result<HeadObjectResult> {
        self.head(&self.key(path))?
            .ok_or_else(|| anyhow!("File not found: {}", path))
    }

    fn list_keys(&self, prefix: &str, delimiter: Option<&str>) -> Result<Vec<s3::serde_types::ListBucketResult>> {
        self.runtime
            .block_on(self.bucket.list(prefix.to_string(), delimiter.map(str::to_string)))
            .map_err(|e| anyhow!("Failed to list S3 objects under {:?}: {}", prefix, e))
    }

    /// CopyObject, then verify the destination exists / 服务端复制并校验结果
    fn copy_object(&self, bucket: &Bucket, src_key: &str, dst_key: &str) -> Result<()> {
        // The copy source header must be url-encoded for non-ASCII keys
        let encoded_src = encode_key(src_key);
        tracing::debug!("S3 CopyObject: {} -> {}", src_key, dst_key);
        let code = self
            .runtime
            .block_on(bucket.copy_object_internal(&encoded_src, dst_key))
            .map_err(|e| anyhow!("S3 CopyObject failed: {}", e))?;
        if !(200..300).contains(&code) {
            return Err(anyhow!("S3 CopyObject {} -> {} returned {}", src_key, dst_key, code));
        }
        if self.head(dst_key)?.is_none() {
            return Err(anyhow!("S3 CopyObject destination missing: {}", dst_key));
        }
        Ok(())
    }

    /// Upload the rest of `contents` part by part, one chunk in memory at a time
    /// 分片上传，内存中只保留一个分片
    fn multipart_upload(
        &self,
        bucket: &Bucket,
        key: &str,
        content_type: &str,
        contents: &mut dyn Read,
        first: Vec<u8>,
    ) -> Result<()> {
        let upload_id = self
            .runtime
            .block_on(bucket.initiate_multipart_upload(key, content_type))
            .map_err(|e| anyhow!("Failed to initiate multipart upload {}: {}", key, e))?
            .upload_id;
        tracing::debug!("S3 multipart upload started: key={}, upload_id={}", key, upload_id);

        let result = self
            .upload_parts(key, &upload_id, content_type, contents, first)
            .and_then(|parts| {
                self.runtime
                    .block_on(self.bucket.complete_multipart_upload(key, &upload_id, parts))
                    .map_err(|e| anyhow!("Failed to complete multipart upload {}: {}", key, e))
            });
        match result {
            Ok(_) => {
                tracing::debug!("S3 multipart upload finished: key={}", key);
                Ok(())
            }
            Err(e) => {
                if let Err(abort) = self.runtime.block_on(self.bucket.abort_upload(key, &upload_id)) {
                    tracing::warn!("Failed to abort multipart upload {}: {}", key, abort);
                }
                Err(e)
            }
        }
    }

    fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        content_type: &str,
        contents: &mut dyn Read,
        first: Vec<u8>,
    ) -> Result<Vec<Part>> {
        let mut parts = Vec::new();
        let mut chunk = first;
        let mut part_number: u32 = 1;
        loop {
            tracing::debug!("S3 upload part: key={}, part={}, size={}", key, part_number, chunk.len());
            let response = self
                .runtime
                .block_on(self.bucket.put_multipart_chunk(
                    std::mem::take(&mut chunk),
                    key,
                    part_number,
                    upload_id,
                    content_type,
                ))
                .map_err(|e| anyhow!("Failed to upload part {} of {}: {}", part_number, key, e))?;
            parts.push(Part { part_number, etag: response.etag });

            if fill_chunk(contents, &mut chunk, CHUNK_SIZE)? == 0 {
                return Ok(parts);
            }
            part_number += 1;
        }
    }

    fn delete_key(&self, key: &str) -> Result<()> {
        let response = self
            .runtime
            .block_on(self.bucket.delete_object(key))
            .map_err(|e| anyhow!("Failed to delete S3 object {}: {}", key, e))?;
        match response.status_code() {
            200..=299 | 404 => Ok(()),
            code => Err(anyhow!("S3 DELETE {} returned {}", key, code)),
        }
    }

    fn entries_shallow(&self, path: &str) -> Result<Vec<Entry>> {
        let prefix = self.dir_prefix(path);
        let mut entries = Vec::new();
        for page in self.list_keys(&prefix, Some("/"))? {
            for common in page.common_prefixes.unwrap_or_default() {
                let logical = self.logical(&common.prefix);
                if !logical.is_empty() {
                    entries.push(Entry::dir(logical));
                }
            }
            for object in page.contents {
                if object.key.ends_with('/') || self.is_placeholder(&object.key) {
                    continue;
                }
                entries.push(
                    Entry::file(self.logical(&object.key), object.size)
                        .modified(parse_listing_time(&object.last_modified)),
                );
            }
        }
        Ok(entries)
    }

    fn entries_deep(&self, path: &str) -> Result<Vec<Entry>> {
        let prefix = self.dir_prefix(path);
        let base = self.logical(&prefix);
        let mut directories = BTreeSet::new();
        let mut files = Vec::new();

        for page in self.list_keys(&prefix, None)? {
            for object in page.contents {
                let logical = self.logical(&object.key);
                // Every intermediate segment below the listed path is a directory
                let mut parent = dirname(&logical);
                while !parent.is_empty() && parent != base {
                    directories.insert(parent.to_string());
                    parent = dirname(parent);
                }
                if object.key.ends_with('/') || self.is_placeholder(&object.key) {
                    continue;
                }
                files.push(
                    Entry::file(logical, object.size)
                        .modified(parse_listing_time(&object.last_modified)),
                );
            }
        }

        let mut entries: Vec<Entry> = directories.into_iter().map(Entry::dir).collect();
        entries.extend(files);
        Ok(entries)
    }
}

impl StorageAdapter for S3Adapter {
    fn name(&self) -> &str {
        "s3"
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.head(&self.key(path))?.is_some())
    }

    fn directory_exists(&self, path: &str) -> Result<bool> {
        let prefix = self.dir_prefix(path);
        let pages = self.list_keys(&prefix, Some("/"))?;
        Ok(pages.iter().any(|page| {
            !page.contents.is_empty() || page.common_prefixes.as_ref().map_or(false, |p| !p.is_empty())
        }))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let key = self.key(path);
        let response = self
            .runtime
            .block_on(self.bucket.get_object(&key))
            .map_err(|e| anyhow!("Failed to get S3 object {}: {}", key, e))?;
        match response.status_code() {
            200 => Ok(response.bytes().to_vec()),
            404 => Err(anyhow!("File not found: {}", path)),
            code => Err(anyhow!("S3 GET {} returned {}", key, code)),
        }
    }

    fn open_reader(&self, path: &str) -> Result<ReadStream> {
        // rust-s3 returns the whole body, hand it out as a cursor
        Ok(Box::new(Cursor::new(self.read(path)?)))
    }

    fn write_stream(&self, path: &str, contents: &mut dyn Read, options: &WriteOptions) -> Result<()> {
        let key = self.key(path);
        let content_type = options
            .mime_type
            .clone()
            .unwrap_or_else(|| mime_guess::from_path(path).first_or_octet_stream().to_string());
        let bucket = match options.visibility {
            Some(visibility) => self.bucket_with_headers(&self.visibility_headers(visibility)),
            None => self.bucket.clone(),
        };

        let mut chunk = Vec::with_capacity(CHUNK_SIZE);
        let first = fill_chunk(contents, &mut chunk, CHUNK_SIZE)?;
        if first < CHUNK_SIZE {
            tracing::debug!("S3 PUT {} ({} bytes)", key, first);
            let response = self
                .runtime
                .block_on(bucket.put_object_with_content_type(&key, &chunk, &content_type))
                .map_err(|e| anyhow!("Failed to upload S3 object {}: {}", key, e))?;
            return match response.status_code() {
                200..=299 => Ok(()),
                code => Err(anyhow!("S3 PUT {} returned {}", key, code)),
            };
        }
        self.multipart_upload(&bucket, &key, &content_type, contents, chunk)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.delete_key(&self.key(path))
    }

    fn delete_dir(&self, path: &str) -> Result<()> {
        let prefix = self.dir_prefix(path);
        if prefix.is_empty() {
            return Err(anyhow!("Refusing to delete the bucket root"));
        }
        tracing::debug!("S3 deleting everything under {}", prefix);
        for page in self.list_keys(&prefix, None)? {
            for object in page.contents {
                self.delete_key(&object.key)?;
            }
        }
        Ok(())
    }

    fn create_dir(&self, path: &str, options: &WriteOptions) -> Result<()> {
        let key = self.placeholder_key(path);
        let bucket = match options.visibility {
            Some(visibility) => self.bucket_with_headers(&self.visibility_headers(visibility)),
            None => self.bucket.clone(),
        };
        let response = self
            .runtime
            .block_on(bucket.put_object(&key, &[]))
            .map_err(|e| anyhow!("Failed to create S3 directory {}: {}", path, e))?;
        match response.status_code() {
            200..=299 => Ok(()),
            code => Err(anyhow!("S3 PUT {} returned {}", key, code)),
        }
    }

    fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        let key = self.key(path);
        let head = self.require(path)?;
        let content_type = head
            .content_type
            .unwrap_or_else(|| mime_guess::from_path(path).first_or_octet_stream().to_string());

        // Copy onto itself with replaced metadata
        let mut headers: Vec<(&str, &str)> = self.visibility_headers(visibility);
        headers.push(("x-amz-metadata-directive", "REPLACE"));
        headers.push(("Content-Type", content_type.as_str()));
        let bucket = self.bucket_with_headers(&headers);
        self.copy_object(&bucket, &key, &key)
    }

    fn visibility(&self, path: &str) -> Result<Visibility> {
        let head = self.require(path)?;
        let marker = head
            .metadata
            .as_ref()
            .and_then(|meta| meta.get(VISIBILITY_META))
            .map(|value| value.parse::<Visibility>())
            .transpose()?;
        // Objects are private unless written otherwise
        Ok(marker.unwrap_or(Visibility::Private))
    }

    fn mime_type(&self, path: &str) -> Result<String> {
        let head = self.require(path)?;
        match head.content_type {
            Some(content_type) if !content_type.is_empty() => Ok(content_type),
            _ => mime_guess::from_path(path)
                .first()
                .map(|mime| mime.to_string())
                .ok_or_else(|| anyhow!("Unable to detect mime type: {}", path)),
        }
    }

    fn last_modified(&self, path: &str) -> Result<DateTime<Utc>> {
        let head = self.require(path)?;
        head.last_modified
            .as_deref()
            .and_then(parse_listing_time)
            .ok_or_else(|| anyhow!("S3 returned no Last-Modified for {}", path))
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        let head = self.require(path)?;
        head.content_length
            .map(|len| len.max(0) as u64)
            .ok_or_else(|| anyhow!("S3 returned no Content-Length for {}", path))
    }

    fn list(&self, path: &str, deep: bool) -> Result<Vec<Entry>> {
        if deep {
            self.entries_deep(path)
        } else {
            self.entries_shallow(path)
        }
    }

    fn move_item(&self, source: &str, destination: &str, _options: &WriteOptions) -> Result<()> {
        let (src_key, dst_key) = (self.key(source), self.key(destination));
        self.copy_object(&self.bucket, &src_key, &dst_key)?;
        self.delete_key(&src_key)
    }

    fn copy_item(&self, source: &str, destination: &str, _options: &WriteOptions) -> Result<()> {
        self.copy_object(&self.bucket, &self.key(source), &self.key(destination))
    }

    fn public_urls(&self) -> Option<&dyn PublicUrlGenerator> {
        Some(self)
    }

    fn temporary_urls(&self) -> Option<&dyn TemporaryUrlGenerator> {
        Some(self)
    }
}

impl PublicUrlGenerator for S3Adapter {
    fn public_url(&self, path: &str) -> String {
        let key = encode_key(&self.key(path));
        if self.config.custom_host.is_empty() {
            concat_path_to_url(&self.bucket.url(), &key)
        } else {
            concat_path_to_url(&self.config.custom_host, &key)
        }
    }
}

impl TemporaryUrlGenerator for S3Adapter {
    fn temporary_url(&self, path: &str, expires_at: DateTime<Utc>) -> Result<String> {
        let millis = (expires_at - Utc::now()).num_milliseconds();
        let secs = ((millis + 999) / 1000).clamp(1, MAX_PRESIGN_SECS);
        let key = self.key(path);
        self.runtime
            .block_on(self.bucket.presign_get(&key, secs as u32, None))
            .map_err(|e| anyhow!("Failed to presign {}: {}", key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(root: &str) -> S3Adapter {
        let config: S3Config = serde_json::from_value(serde_json::json!({
            "bucket": "assets",
            "region": "eu-west-1",
            "key": "AKIDEXAMPLE",
            "secret": "wJalrXUtnFEMI/K7MDENG",
        }))
        .unwrap();
        S3Adapter::new(config, root).unwrap()
    }

    #[test]
    fn test_fill_chunk_spans_short_reads() {
        // Readers that hand out a few bytes per call still fill whole parts
        let mut source = Cursor::new(b"abc".to_vec())
            .chain(Cursor::new(b"defg".to_vec()))
            .chain(Cursor::new(b"hi".to_vec()));
        let mut chunk = Vec::new();
        assert_eq!(fill_chunk(&mut source, &mut chunk, 4).unwrap(), 4);
        assert_eq!(chunk, b"abcd");
        assert_eq!(fill_chunk(&mut source, &mut chunk, 4).unwrap(), 4);
        assert_eq!(chunk, b"efgh");
        assert_eq!(fill_chunk(&mut source, &mut chunk, 4).unwrap(), 1);
        assert_eq!(chunk, b"i");
        assert_eq!(fill_chunk(&mut source, &mut chunk, 4).unwrap(), 0);
        assert!(chunk.is_empty());
    }

    #[test]
    fn test_key_mapping() {
        let rooted = adapter("/uploads/");
        assert_eq!(rooted.key("a/b.txt"), "uploads/a/b.txt");
        assert_eq!(rooted.dir_prefix(""), "uploads/");
        assert_eq!(rooted.dir_prefix("a"), "uploads/a/");
        assert_eq!(rooted.logical("uploads/a/b.txt"), "a/b.txt");
        assert_eq!(rooted.logical("uploads/a/"), "a");
        assert_eq!(rooted.placeholder_key("a"), "uploads/a/.keep");

        let bare = adapter("");
        assert_eq!(bare.key("a.txt"), "a.txt");
        assert_eq!(bare.dir_prefix(""), "");
    }

    #[test]
    fn test_encode_key() {
        assert_eq!(encode_key("docs/年度 报告.pdf"), "docs/%E5%B9%B4%E5%BA%A6%20%E6%8A%A5%E5%91%8A.pdf");
        assert_eq!(encode_key("plain/file.txt"), "plain/file.txt");
    }

    #[test]
    fn test_parse_listing_time() {
        let listed = parse_listing_time("2024-03-01T10:00:00.000Z").unwrap();
        assert_eq!(listed.timestamp(), 1709287200);
        let head = parse_listing_time("Fri, 01 Mar 2024 10:00:00 GMT").unwrap();
        assert_eq!(head, listed);
        assert!(parse_listing_time("yesterday").is_none());
    }

    #[test]
    fn test_visibility_headers() {
        let adapter = adapter("");
        assert_eq!(
            adapter.visibility_headers(Visibility::Public),
            vec![("x-amz-meta-visibility", "public"), ("x-amz-acl", "public-read")]
        );

        let mut config = adapter.config.clone();
        config.acl = false;
        let no_acl = S3Adapter::new(config, "").unwrap();
        assert_eq!(
            no_acl.visibility_headers(Visibility::Private),
            vec![("x-amz-meta-visibility", "private")]
        );
    }
}
