use prometheus::{IntCounterVec, Opts, Registry};

/// Upload counters by file type, registered on the shared Prometheus registry
#[derive(Clone)]
pub struct UploadMetrics {
    uploads: IntCounterVec,
    errors: IntCounterVec,
}

impl UploadMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let uploads = IntCounterVec::new(
            Opts::new(
                "file_uploads_count",
                "Total number of successful file uploads grouped by file type.",
            ),
            &["file_type"],
        )?;
        registry.register(Box::new(uploads.clone()))?;

        let errors = IntCounterVec::new(
            Opts::new(
                "file_upload_errors",
                "Total number of failed file uploads grouped by file type.",
            ),
            &["file_type"],
        )?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self { uploads, errors })
    }

    pub fn record_upload(&self, file_type: &str) {
        self.uploads.with_label_values(&[file_type]).inc();
    }

    pub fn record_error(&self, file_type: &str) {
        self.errors.with_label_values(&[file_type]).inc();
    }

    pub fn uploads(&self, file_type: &str) -> u64 {
        self.uploads.with_label_values(&[file_type]).get()
    }

    pub fn errors(&self, file_type: &str) -> u64 {
        self.errors.with_label_values(&[file_type]).get()
    }
}
