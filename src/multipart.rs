//! `multipart/form-data` framing for single-file uploads
//!
//! A [`MultipartUpload`] produces the literal prefix and suffix that surround a streamed file, so that the file itself
//! never has to be copied into memory.

use crate::body::{Body, StreamSource};

const LINE_BREAK: &str = "\r\n";

/// Builder for the segments of a `multipart/form-data` body carrying text fields followed by one file part.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    boundary: String,
    fields: Vec<(String, String)>,
    file_field: String,
    filename: Option<String>,
    file_content_type: String,
}

impl MultipartUpload {
    /// Create an upload separated by `boundary`, with a default file part named `file` of type
    /// `application/octet-stream`.
    pub fn new<B: Into<String>>(boundary: B) -> Self {
        Self {
            boundary: boundary.into(),
            fields: Vec::new(),
            file_field: "file".to_owned(),
            filename: None,
            file_content_type: "application/octet-stream".to_owned(),
        }
    }

    /// Add a text field, sent before the file part.
    pub fn field<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Describe the file part.
    pub fn file<N: Into<String>, F: Into<String>, T: Into<String>>(
        mut self,
        name: N,
        filename: F,
        content_type: T,
    ) -> Self {
        self.file_field = name.into();
        self.filename = Some(filename.into());
        self.file_content_type = content_type.into();
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Every text field, then the headers of the file part
    pub fn prefix(&self) -> Vec<u8> {
        let mut prefix = String::new();
        for (name, value) in self.fields.iter() {
            prefix.push_str(&format!("--{}{LINE_BREAK}", self.boundary));
            prefix.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"{LINE_BREAK}{LINE_BREAK}",
                escape(name)
            ));
            prefix.push_str(value);
            prefix.push_str(LINE_BREAK);
        }
        prefix.push_str(&format!("--{}{LINE_BREAK}", self.boundary));
        prefix.push_str(&format!(
            "Content-Disposition: form-data; name=\"{}\"",
            escape(&self.file_field)
        ));
        if let Some(filename) = &self.filename {
            prefix.push_str(&format!("; filename=\"{}\"", escape(filename)));
        }
        prefix.push_str(LINE_BREAK);
        prefix.push_str(&format!(
            "Content-Type: {}{LINE_BREAK}{LINE_BREAK}",
            self.file_content_type
        ));
        prefix.into_bytes()
    }

    /// Close of the file part and the final boundary
    pub fn suffix(&self) -> Vec<u8> {
        format!("{LINE_BREAK}--{}--{LINE_BREAK}", self.boundary).into_bytes()
    }

    /// Frame `source` as the file part
    pub fn into_body<S: StreamSource>(self, source: S) -> Body<S> {
        Body::new(self.prefix(), source, self.suffix())
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
