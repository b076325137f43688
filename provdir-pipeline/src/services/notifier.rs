//! Notification drafting for HOLD records
//!
//! Drafts the outreach message asking a provider to verify their directory
//! information. Drafts are stored with the hold-queue entry; delivery is a
//! separate concern and out of scope.

use crate::collaborators::NotificationDrafter;
use crate::models::ProviderRecord;
use serde::{Deserialize, Serialize};

/// A drafted notification (subject + body)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// Default notification drafter for the directory operator
pub struct DirectoryNotifier {
    pub network_name: String,
    pub contact_email: String,
}

impl Default for DirectoryNotifier {
    fn default() -> Self {
        Self {
            network_name: "Provider Directory".to_string(),
            contact_email: "provider.directory@example.com".to_string(),
        }
    }
}

impl NotificationDrafter for DirectoryNotifier {
    fn draft_notification(&self, record: &ProviderRecord) -> Notification {
        let name = record.field("name").unwrap_or("Provider");
        let score = record.composite_score.unwrap_or(0.0);
        let issues = if record.reasons.is_empty() {
            "incomplete profile information".to_string()
        } else {
            record.reasons.join(", ")
        };

        let subject = format!(
            "Action Required: Provider Directory Information Verification - {}",
            name
        );

        let body = format!(
            "Dear {name},\n\n\
             We are updating our provider directory to ensure members have access to\n\
             accurate information about providers in our network. Our verification\n\
             process was unable to confirm your profile (record {id}, confidence\n\
             {score:.2}). Open items: {issues}.\n\n\
             Please contact us to verify your information and provide any missing\n\
             documentation.\n\n\
             {network}\n{contact}\n",
            name = name,
            id = record.identifier,
            score = score,
            issues = issues,
            network = self.network_name,
            contact = self.contact_email,
        );

        Notification { subject, body }
    }
}
