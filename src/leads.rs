//! Captured sales leads and where they are kept.
//!
//! Handlers get a [`LeadBook`] through the router state. Storage sits behind
//! [`LeadStore`] so a durable backend can replace [`InMemoryLeadStore`]; the
//! in-memory one loses everything on restart.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::tool::{Budget, CaptureLeadInput, Priority};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub email: String,
    pub project_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_notes: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl Lead {
    fn from_input(id: String, input: CaptureLeadInput, captured_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: input.name,
            email: input.email,
            project_summary: input.project_summary,
            budget: input.budget,
            priority: input.priority,
            timeline: input.timeline,
            company_name: input.company_name,
            additional_notes: input.additional_notes,
            captured_at,
        }
    }
}

/// Append-only lead persistence. Implementations must accept concurrent appends.
pub trait LeadStore: Send + Sync {
    fn append(&self, lead: Lead);

    /// Snapshot in insertion order. May trail an append that is still in progress.
    fn list(&self) -> Vec<Lead>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLeadStore {
    leads: RwLock<Vec<Lead>>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeadStore for InMemoryLeadStore {
    fn append(&self, lead: Lead) {
        // A panic elsewhere while holding the lock cannot leave a half-written Vec.
        let mut leads = self.leads.write().unwrap_or_else(|e| e.into_inner());
        leads.push(lead);
    }

    fn list(&self) -> Vec<Lead> {
        self.leads.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn len(&self) -> usize {
        self.leads.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// The lead ledger shared by every request.
#[derive(Clone)]
pub struct LeadBook {
    store: Arc<dyn LeadStore>,
}

impl LeadBook {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLeadStore::new()))
    }

    /// Stores a validated capture and returns the new lead. Duplicate emails are kept.
    pub fn record(&self, input: CaptureLeadInput) -> Lead {
        self.record_at(input, Utc::now())
    }

    pub fn record_at(&self, input: CaptureLeadInput, captured_at: DateTime<Utc>) -> Lead {
        let lead = Lead::from_input(mint_lead_id(captured_at), input, captured_at);
        self.store.append(lead.clone());
        lead
    }

    pub fn list(&self) -> Vec<Lead> {
        self.store.list()
    }

    pub fn count(&self) -> usize {
        self.store.len()
    }
}

/// `LEAD_<unix millis>_<9 random base36 chars>`.
pub fn mint_lead_id(at: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("LEAD_{}_{}", at.timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn input(name: &str, email: &str) -> CaptureLeadInput {
        CaptureLeadInput {
            name: name.to_string(),
            email: email.to_string(),
            project_summary: "Customer portal rebuild".to_string(),
            budget: Some(Budget::From10kTo25k),
            priority: None,
            timeline: None,
            company_name: Some("Acme".to_string()),
            additional_notes: None,
        }
    }

    #[test]
    fn test_lead_id_format() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let id = mint_lead_id(at);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "LEAD");
        assert_eq!(parts[1], at.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), ID_SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_ids_are_unique_within_the_same_millisecond() {
        let at = Utc::now();
        let ids: HashSet<String> = (0..200).map(|_| mint_lead_id(at)).collect();
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn test_record_appends_in_order_and_keeps_duplicates() {
        let book = LeadBook::in_memory();
        let first = book.record(input("Jane Doe", "jane@example.com"));
        let second = book.record(input("Jane Doe", "jane@example.com"));
        assert_ne!(first.id, second.id);
        let leads = book.list();
        assert_eq!(book.count(), 2);
        assert_eq!(leads[0].id, first.id);
        assert_eq!(leads[1].id, second.id);
    }

    #[test]
    fn test_lead_serializes_camel_case_without_empty_optionals() {
        let book = LeadBook::in_memory();
        let lead = book.record(input("Jane Doe", "jane@example.com"));
        let json = serde_json::to_value(&lead).unwrap();
        assert_eq!(json["projectSummary"], "Customer portal rebuild");
        assert_eq!(json["budget"], "10k_25k");
        assert_eq!(json["companyName"], "Acme");
        assert!(json.get("priority").is_none());
        assert!(json.get("capturedAt").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let book = LeadBook::in_memory();
        let mut handles = Vec::new();
        for i in 0..50 {
            let book = book.clone();
            handles.push(tokio::spawn(async move {
                book.record(input(&format!("Lead {}", i), "x@example.com"));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(book.count(), 50);
        let ids: HashSet<String> = book.list().into_iter().map(|l| l.id).collect();
        assert_eq!(ids.len(), 50);
    }
}
