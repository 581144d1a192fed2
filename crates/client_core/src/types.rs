use shared::domain::JobFlow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub field_name: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FileAttachment {
    pub fn new(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            mime_type: None,
            bytes: bytes.into(),
        }
    }

    /// Uses the form field name the given flow's upload form expects.
    pub fn for_flow(flow: JobFlow, file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let field_name = match flow {
            JobFlow::FineTune => "file",
            JobFlow::EbookConversion => "ebook",
        };
        Self::new(field_name, file_name, bytes)
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Ordered form fields plus exactly one file, consumed by a single
/// job-creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSubmission {
    fields: Vec<(String, String)>,
    attachment: FileAttachment,
}

impl JobSubmission {
    pub fn new(attachment: FileAttachment) -> Self {
        Self {
            fields: Vec::new(),
            attachment,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn attachment(&self) -> &FileAttachment {
        &self.attachment
    }

    pub fn into_parts(self) -> (Vec<(String, String)>, FileAttachment) {
        (self.fields, self.attachment)
    }
}
