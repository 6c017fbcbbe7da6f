// Queue Domain Model

use serde::{Deserialize, Serialize};

/// Queue identifier
pub type QueueName = String;

/// Job domains, one facade and one queue each
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobDomain {
    Ocr,
    Pdf,
    Pohoda,
    Isdoc,
    Notification,
}

impl JobDomain {
    pub const ALL: [JobDomain; 5] = [
        JobDomain::Ocr,
        JobDomain::Pdf,
        JobDomain::Pohoda,
        JobDomain::Isdoc,
        JobDomain::Notification,
    ];

    /// Broker queue name
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobDomain::Ocr => "ocr-process",
            JobDomain::Pdf => "invoice-pdf",
            JobDomain::Pohoda => "invoice-pohoda",
            JobDomain::Isdoc => "invoice-isdoc",
            JobDomain::Notification => "notifications-dispatch",
        }
    }

    /// Job name stored on each record
    pub fn job_name(&self) -> &'static str {
        match self {
            JobDomain::Ocr => "process",
            JobDomain::Notification => "notify",
            JobDomain::Pdf | JobDomain::Pohoda | JobDomain::Isdoc => "generate",
        }
    }

    /// Human label used in error messages
    pub fn label(&self) -> &'static str {
        match self {
            JobDomain::Ocr => "OCR",
            JobDomain::Pdf => "PDF",
            JobDomain::Pohoda => "Pohoda XML",
            JobDomain::Isdoc => "ISDOC",
            JobDomain::Notification => "Notification",
        }
    }

    /// Metrics label (`queue` on the exported gauges)
    pub fn metrics_name(&self) -> &'static str {
        match self {
            JobDomain::Ocr => "ocr",
            JobDomain::Pdf => "pdf",
            JobDomain::Pohoda => "pohoda",
            JobDomain::Isdoc => "isdoc",
            JobDomain::Notification => "notifications",
        }
    }
}

impl std::fmt::Display for JobDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_queue_names_are_unique() {
        let names: HashSet<_> = JobDomain::ALL.iter().map(|d| d.queue_name()).collect();
        assert_eq!(names.len(), JobDomain::ALL.len());
    }
}
