//! Shared job context.
//!
//! Holds the document-side state the run surfaces need; today that is only
//! the file the server should execute. Passed explicitly to whoever needs it.

use crate::model::{JobDescriptor, DEFAULT_JOB_FILE};

#[derive(Debug, Clone)]
pub struct JobContext {
    filename: String,
}

impl Default for JobContext {
    fn default() -> Self {
        Self {
            filename: DEFAULT_JOB_FILE.to_string(),
        }
    }
}

impl JobContext {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = filename.into();
    }

    /// Descriptor for the next run request.
    pub fn descriptor(&self) -> JobDescriptor {
        JobDescriptor::new(self.filename.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_graph_json() {
        let ctx = JobContext::default();
        assert_eq!(ctx.filename(), "graph.json");
        assert_eq!(ctx.descriptor(), JobDescriptor::new("graph.json"));
    }

    #[test]
    fn descriptor_follows_filename_changes() {
        let mut ctx = JobContext::default();
        ctx.set_filename("pipelines/b.json");
        assert_eq!(ctx.descriptor().as_str(), "pipelines/b.json");
    }
}
