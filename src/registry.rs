//! Credential registry
//!
//! Business rules over the ledger. The registry owns the institution,
//! student, credential and research paper maps; every accepted mutation is
//! mirrored as a transaction in the node's pool and the maps are
//! snapshotted to persistence afterwards.
//!
//! Lock order: registry state before the node's pool. The registry never
//! holds its own lock while a mining cycle runs.

use crate::blockchain::{Block, ChainValidation};
use crate::config::{Config, SealingPolicy};
use crate::crypto::generate_credential_id;
use crate::directory::InstitutionDirectory;
use crate::error::ChainError;
use crate::models::{
    CertificateUpload, Credential, CredentialLevel, CredentialStatus, CredentialType,
    Institution, ResearchPaper, Student,
};
use crate::node::LedgerNode;
use crate::persistence::{Database, InMemoryPersistence, Persistence};
use crate::transaction::{
    validate_credential, validate_institution, validate_research_paper, validate_student,
    CertificateUploadTx, Transaction, TransactionKind,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The registry's maps, as persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub institutions: BTreeMap<String, Institution>,
    pub students: BTreeMap<String, Student>,
    pub credentials: BTreeMap<String, Credential>,
    pub research_papers: BTreeMap<String, ResearchPaper>,
}

/// Full dump of registry maps and ledger.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryExport {
    #[serde(flatten)]
    pub snapshot: RegistrySnapshot,
    pub blockchain: Vec<Block>,
    pub export_timestamp: DateTime<Utc>,
}

/// Result of a successful issuance. `block_index`/`block_hash` are set
/// when the issuance was sealed before returning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceReceipt {
    pub credential_id: String,
    pub credential_hash: String,
    pub transaction_id: String,
    pub block_index: Option<u64>,
    pub block_hash: Option<String>,
}

impl IssuanceReceipt {
    pub fn is_sealed(&self) -> bool {
        self.block_index.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperReceipt {
    pub paper_id: String,
    pub paper_hash: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialVerification {
    pub valid: bool,
    pub credential: Credential,
    pub block_index: u64,
    pub block_hash: String,
    pub transaction_id: String,
    pub verified_at: DateTime<Utc>,
    /// Why `valid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Search filters. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialQuery {
    pub student_name: Option<String>,
    pub institution_name: Option<String>,
    pub field_of_study: Option<String>,
    pub credential_type: Option<CredentialType>,
    pub level: Option<CredentialLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_credentials: usize,
    pub total_institutions: usize,
    pub verified_institutions: usize,
    pub total_students: usize,
    pub total_research_papers: usize,
    pub pending_transactions: usize,
    pub credential_types: BTreeMap<String, usize>,
    pub credential_levels: BTreeMap<String, usize>,
    pub blockchain_length: usize,
    pub total_transactions: usize,
    pub latest_block_hash: String,
    pub difficulty: u32,
    pub is_valid: bool,
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub struct CredentialRegistry {
    node: Arc<LedgerNode>,
    state: RwLock<RegistrySnapshot>,
    sealing: SealingPolicy,
}

impl CredentialRegistry {
    /// Build a registry over `node`, restoring any persisted snapshot and
    /// seeding institutions from `directory` that are not already known.
    pub fn new(
        node: Arc<LedgerNode>,
        directory: &InstitutionDirectory,
    ) -> Result<Self, ChainError> {
        let mut state = node.persistence().load_snapshot()?.unwrap_or_default();

        let mut seeded = 0;
        for institution in directory.iter() {
            if !state.institutions.contains_key(&institution.institution_id) {
                state
                    .institutions
                    .insert(institution.institution_id.clone(), institution.clone());
                seeded += 1;
            }
        }
        debug!("Seeded {} institutions from directory", seeded);

        let sealing = node.config().sealing;
        let registry = CredentialRegistry {
            node,
            state: RwLock::new(state),
            sealing,
        };
        registry.recover_pending()?;
        Ok(registry)
    }

    /// Open the registry described by `config`. Falls back to in-memory
    /// storage if the database cannot be opened.
    pub fn open(config: &Config) -> Result<Self, ChainError> {
        config.validate()?;

        let persistence: Box<dyn Persistence> = if config.database.enabled {
            match Database::open(&config.database.path) {
                Ok(db) => Box::new(db),
                Err(e) => {
                    warn!(
                        "Failed to open DB at {}: {}. Falling back to in-memory persistence.",
                        config.database.path, e
                    );
                    Box::new(InMemoryPersistence::new())
                }
            }
        } else {
            Box::new(InMemoryPersistence::new())
        };

        let node = Arc::new(LedgerNode::new(config.ledger.clone(), persistence)?);
        let directory = InstitutionDirectory::from_config(&config.directory)?;
        Self::new(node, &directory)
    }

    /// Sync credential statuses with the ledger after a restart: sealed
    /// issuances become `Sealed`. An issued credential that is neither
    /// sealed nor in the restored pool gets its issuance queued again.
    fn recover_pending(&self) -> Result<(), ChainError> {
        let pending: HashSet<String> = self
            .node
            .pool()
            .snapshot()
            .iter()
            .filter_map(|tx| tx.credential_id().map(str::to_string))
            .collect();

        let mut requeued = 0;
        {
            let mut state = self.state.write();
            let chain = self.node.chain();
            for credential in state.credentials.values_mut() {
                if credential.status != CredentialStatus::Issued {
                    continue;
                }
                if chain.find_credential(&credential.credential_id).is_some() {
                    credential.status = CredentialStatus::Sealed;
                } else if !pending.contains(&credential.credential_id) {
                    let tx = Transaction::new(TransactionKind::CredentialIssuance(
                        (&*credential).into(),
                    ));
                    self.node.submit(tx)?;
                    requeued += 1;
                }
            }
        }
        if requeued > 0 {
            info!("Re-queued {} unsealed credential issuances", requeued);
        }
        Ok(())
    }

    pub fn node(&self) -> &Arc<LedgerNode> {
        &self.node
    }

    pub fn sealing(&self) -> SealingPolicy {
        self.sealing
    }

    fn persist_snapshot(&self) {
        let snapshot = self.state.read().clone();
        if let Err(e) = self.node.persistence().save_snapshot(&snapshot) {
            warn!("Failed to persist registry snapshot: {}", e);
        }
    }

    pub fn register_institution(&self, institution: Institution) -> Result<String, ChainError> {
        let errors = validate_institution(&institution);
        if !errors.is_empty() {
            return Err(ChainError::ValidationError(errors));
        }

        let tx_id = {
            let mut state = self.state.write();
            if state.institutions.contains_key(&institution.institution_id) {
                return Err(ChainError::DuplicateInstitution(institution.institution_id));
            }
            let tx =
                Transaction::new(TransactionKind::InstitutionRegistration((&institution).into()));
            let tx_id = self.node.submit(tx)?;
            info!(
                "Registered institution {} ({}, verified: {})",
                institution.institution_id, institution.name, institution.is_verified
            );
            state
                .institutions
                .insert(institution.institution_id.clone(), institution);
            tx_id
        };

        self.persist_snapshot();
        Ok(tx_id)
    }

    pub fn register_student(&self, student: Student) -> Result<String, ChainError> {
        let errors = validate_student(&student);
        if !errors.is_empty() {
            return Err(ChainError::ValidationError(errors));
        }

        let tx_id = {
            let mut state = self.state.write();
            self.insert_student(&mut state, student)?
        };
        self.persist_snapshot();
        Ok(tx_id)
    }

    fn insert_student(
        &self,
        state: &mut RegistrySnapshot,
        student: Student,
    ) -> Result<String, ChainError> {
        if state.students.contains_key(&student.student_id) {
            return Err(ChainError::DuplicateStudent(student.student_id));
        }
        let tx = Transaction::new(TransactionKind::StudentRegistration((&student).into()));
        let tx_id = self.node.submit(tx)?;
        info!("Registered student {}", student.student_id);
        state.students.insert(student.student_id.clone(), student);
        Ok(tx_id)
    }

    /// Issue `credential` on behalf of `issuer_id`.
    ///
    /// Under [`SealingPolicy::Synchronous`] a block is mined before this
    /// returns. If that mining cycle fails the credential stays issued and
    /// pending, and the receipt carries no block.
    pub fn issue_credential(
        &self,
        credential: Credential,
        issuer_id: &str,
    ) -> Result<IssuanceReceipt, ChainError> {
        let mut credential = credential;
        credential.status = CredentialStatus::Issued;

        let (credential_hash, transaction_id) = {
            let mut state = self.state.write();

            let institution = state
                .institutions
                .get(issuer_id)
                .ok_or_else(|| ChainError::InstitutionNotFound(issuer_id.to_string()))?;
            if !institution.is_verified {
                return Err(ChainError::InstitutionNotVerified(issuer_id.to_string()));
            }

            let errors = validate_credential(&credential, issuer_id);
            if !errors.is_empty() {
                return Err(ChainError::ValidationError(errors));
            }

            if state.credentials.contains_key(&credential.credential_id) {
                return Err(ChainError::DuplicateCredential(credential.credential_id));
            }

            if !state.students.contains_key(&credential.student_id) {
                let name = credential
                    .student_name
                    .clone()
                    .unwrap_or_else(|| credential.student_id.clone());
                let student =
                    Student::new(&credential.student_id, &name).with_institution(issuer_id);
                self.insert_student(&mut state, student)?;
            }

            let tx = Transaction::new(TransactionKind::CredentialIssuance((&credential).into()));
            let transaction_id = self.node.submit(tx)?;
            let credential_hash = credential.calculate_hash();
            info!(
                "Issued credential {} to {} by {}",
                credential.credential_id, credential.student_id, issuer_id
            );
            state
                .credentials
                .insert(credential.credential_id.clone(), credential.clone());
            (credential_hash, transaction_id)
        };
        self.persist_snapshot();

        let mut receipt = IssuanceReceipt {
            credential_id: credential.credential_id.clone(),
            credential_hash,
            transaction_id,
            block_index: None,
            block_hash: None,
        };

        if self.sealing == SealingPolicy::Synchronous {
            let identity = self.node.config().miner_identity.clone();
            // A concurrent caller's cycle may have sealed this issuance
            // already, so the ledger decides what the receipt says.
            let mined = self.mine_pending(&identity);
            match self.node.chain().find_credential(&credential.credential_id) {
                Some((block, _)) => {
                    receipt.block_index = Some(block.index);
                    receipt.block_hash = Some(block.hash_hex());
                }
                None => warn!(
                    "Credential {} left pending, sealing failed: {}",
                    credential.credential_id,
                    mined.err().map(|e| e.to_string()).unwrap_or_default()
                ),
            }
        }

        Ok(receipt)
    }

    pub fn submit_research_paper(
        &self,
        paper: ResearchPaper,
        institution_id: &str,
    ) -> Result<PaperReceipt, ChainError> {
        let receipt = {
            let mut state = self.state.write();
            if !state.institutions.contains_key(institution_id) {
                return Err(ChainError::InstitutionNotFound(institution_id.to_string()));
            }
            if state.research_papers.contains_key(&paper.paper_id) {
                return Err(ChainError::DuplicateResearchPaper(paper.paper_id));
            }
            let errors = validate_research_paper(&paper);
            if !errors.is_empty() {
                return Err(ChainError::ValidationError(errors));
            }

            let tx = Transaction::new(TransactionKind::ResearchPaperSubmission((&paper).into()));
            let transaction_id = self.node.submit(tx)?;
            let receipt = PaperReceipt {
                paper_id: paper.paper_id.clone(),
                paper_hash: paper.calculate_hash(),
                transaction_id,
            };
            info!("Research paper {} submitted by {}", paper.paper_id, institution_id);
            state.research_papers.insert(paper.paper_id.clone(), paper);
            receipt
        };
        self.persist_snapshot();
        Ok(receipt)
    }

    /// Record an externally uploaded certificate file. Returns the
    /// generated certificate id.
    pub fn record_certificate_upload(
        &self,
        upload: &CertificateUpload,
    ) -> Result<String, ChainError> {
        let certificate_id = generate_credential_id("CERT");
        let tx = Transaction::new(TransactionKind::CertificateUpload(CertificateUploadTx::new(
            certificate_id.clone(),
            upload,
        )));
        self.node.submit(tx)?;
        info!(
            "Recorded certificate upload {} for {} ({})",
            certificate_id, upload.student_id, upload.file_hash
        );
        Ok(certificate_id)
    }

    /// Seal everything pending and mark the credentials it carried as
    /// `Sealed`.
    pub fn mine_pending(&self, miner_identity: &str) -> Result<Block, ChainError> {
        let block = self.node.mine_pending(miner_identity)?;
        self.mark_sealed(&block);
        Ok(block)
    }

    /// Async variant of [`CredentialRegistry::mine_pending`].
    pub async fn mine_pending_async(
        &self,
        miner_identity: &str,
        timeout: Option<std::time::Duration>,
    ) -> Result<Block, ChainError> {
        let block = self.node.mine_pending_async(miner_identity, timeout).await?;
        self.mark_sealed(&block);
        Ok(block)
    }

    fn mark_sealed(&self, block: &Block) {
        let mut sealed = 0;
        {
            let mut state = self.state.write();
            for id in block.transactions.iter().filter_map(|tx| tx.credential_id()) {
                if let Some(credential) = state.credentials.get_mut(id) {
                    if credential.status == CredentialStatus::Issued {
                        credential.status = CredentialStatus::Sealed;
                        sealed += 1;
                    }
                }
            }
        }
        if sealed > 0 {
            debug!("{} credentials sealed in block {}", sealed, block.index);
            self.persist_snapshot();
        }
    }

    /// Confirm `credential_id` was sealed into the ledger by an institution
    /// that is still trusted, and that the registry copy still matches the
    /// sealed fingerprint.
    pub fn verify_credential(
        &self,
        credential_id: &str,
    ) -> Result<CredentialVerification, ChainError> {
        let (credential, institution) = {
            let state = self.state.read();
            let credential = state
                .credentials
                .get(credential_id)
                .cloned()
                .ok_or_else(|| ChainError::CredentialNotFound(credential_id.to_string()))?;
            let institution = state.institutions.get(&credential.institution_id).cloned();
            (credential, institution)
        };

        let (block_index, block_hash, transaction_id, sealed_hash) = {
            let chain = self.node.chain();
            let (block, tx) = chain
                .find_credential(credential_id)
                .ok_or_else(|| ChainError::NotFoundInLedger(credential_id.to_string()))?;
            let sealed_hash = match &tx.kind {
                TransactionKind::CredentialIssuance(issuance) => issuance.credential_hash.clone(),
                _ => String::new(),
            };
            (block.index, block.hash_hex(), tx.id.clone(), sealed_hash)
        };

        let reason = match institution {
            None => Some("Issuing institution not found".to_string()),
            Some(inst) if !inst.is_verified => Some("Issuing institution not verified".to_string()),
            Some(_) if credential.status == CredentialStatus::Rejected => {
                Some("Credential has been rejected".to_string())
            }
            Some(_) if credential.calculate_hash() != sealed_hash => {
                Some("Credential does not match its sealed fingerprint".to_string())
            }
            Some(_) => None,
        };
        let valid = reason.is_none();

        let mut credential = credential;
        if valid {
            credential.status = CredentialStatus::Verified;
            let changed = {
                let mut state = self.state.write();
                match state.credentials.get_mut(credential_id) {
                    Some(stored) if stored.status != CredentialStatus::Verified => {
                        stored.status = CredentialStatus::Verified;
                        true
                    }
                    _ => false,
                }
            };
            if changed {
                self.persist_snapshot();
            }
            info!("Credential {} verified (block {})", credential_id, block_index);
        } else {
            warn!(
                "Credential {} failed verification: {}",
                credential_id,
                reason.as_deref().unwrap_or_default()
            );
        }

        Ok(CredentialVerification {
            valid,
            credential,
            block_index,
            block_hash,
            transaction_id,
            verified_at: Utc::now(),
            reason,
        })
    }

    /// Mark a credential as rejected by an external review.
    pub fn reject_credential(&self, credential_id: &str) -> Result<(), ChainError> {
        {
            let mut state = self.state.write();
            let credential = state
                .credentials
                .get_mut(credential_id)
                .ok_or_else(|| ChainError::CredentialNotFound(credential_id.to_string()))?;
            credential.status = CredentialStatus::Rejected;
        }
        warn!("Credential {} rejected", credential_id);
        self.persist_snapshot();
        Ok(())
    }

    pub fn institution(&self, institution_id: &str) -> Option<Institution> {
        self.state.read().institutions.get(institution_id).cloned()
    }

    pub fn student(&self, student_id: &str) -> Option<Student> {
        self.state.read().students.get(student_id).cloned()
    }

    pub fn credential(&self, credential_id: &str) -> Option<Credential> {
        self.state.read().credentials.get(credential_id).cloned()
    }

    pub fn research_paper(&self, paper_id: &str) -> Option<ResearchPaper> {
        self.state.read().research_papers.get(paper_id).cloned()
    }

    pub fn student_credentials(&self, student_id: &str) -> Vec<Credential> {
        self.state
            .read()
            .credentials
            .values()
            .filter(|c| c.student_id == student_id)
            .cloned()
            .collect()
    }

    pub fn institution_credentials(&self, institution_id: &str) -> Vec<Credential> {
        self.state
            .read()
            .credentials
            .values()
            .filter(|c| c.institution_id == institution_id)
            .cloned()
            .collect()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.node.pool().snapshot()
    }

    /// Linear scan over every credential.
    pub fn search_credentials(&self, query: &CredentialQuery) -> Vec<Credential> {
        let state = self.state.read();
        state
            .credentials
            .values()
            .filter(|credential| {
                if let Some(wanted) = &query.student_name {
                    let name = credential
                        .student_name
                        .as_deref()
                        .or_else(|| {
                            state
                                .students
                                .get(&credential.student_id)
                                .map(|s| s.name.as_str())
                        })
                        .unwrap_or_default();
                    if !contains_ci(name, wanted) {
                        return false;
                    }
                }
                if let Some(wanted) = &query.institution_name {
                    let name = state
                        .institutions
                        .get(&credential.institution_id)
                        .map(|i| i.name.as_str())
                        .unwrap_or_default();
                    if !contains_ci(name, wanted) {
                        return false;
                    }
                }
                if let Some(wanted) = &query.field_of_study {
                    let field = credential.field_of_study.as_deref().unwrap_or_default();
                    if !contains_ci(field, wanted) {
                        return false;
                    }
                }
                if let Some(wanted) = query.credential_type {
                    if credential.credential_type != wanted {
                        return false;
                    }
                }
                if let Some(wanted) = query.level {
                    if credential.level != Some(wanted) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect()
    }

    pub fn statistics(&self) -> RegistryStats {
        let state = self.state.read();

        let mut credential_types = BTreeMap::new();
        let mut credential_levels = BTreeMap::new();
        for credential in state.credentials.values() {
            *credential_types
                .entry(credential.credential_type.to_string())
                .or_insert(0) += 1;
            if let Some(level) = credential.level {
                *credential_levels.entry(level.as_str().to_string()).or_insert(0) += 1;
            }
        }

        let chain = self.node.chain();
        RegistryStats {
            total_credentials: state.credentials.len(),
            total_institutions: state.institutions.len(),
            verified_institutions: state.institutions.values().filter(|i| i.is_verified).count(),
            total_students: state.students.len(),
            total_research_papers: state.research_papers.len(),
            pending_transactions: self.node.pool().len(),
            credential_types,
            credential_levels,
            blockchain_length: chain.len(),
            total_transactions: chain.total_transactions(),
            latest_block_hash: chain.latest().hash_hex(),
            difficulty: chain.difficulty(),
            is_valid: chain.validate() == ChainValidation::Valid,
        }
    }

    pub fn export(&self) -> RegistryExport {
        let snapshot = self.state.read().clone();
        let blockchain = self.node.chain().blocks().to_vec();
        RegistryExport {
            snapshot,
            blockchain,
            export_timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;

    fn registry(sealing: SealingPolicy) -> CredentialRegistry {
        let config = LedgerConfig {
            difficulty: 1,
            sealing,
            ..LedgerConfig::default()
        };
        let node = LedgerNode::new(config, Box::new(InMemoryPersistence::new())).unwrap();
        CredentialRegistry::new(Arc::new(node), &InstitutionDirectory::empty()).unwrap()
    }

    fn trusted(registry: &CredentialRegistry, id: &str) {
        registry
            .register_institution(Institution::new(id, "Test Institute", "Chennai", true))
            .unwrap();
    }

    #[test]
    fn test_register_institution_rejects_duplicate() {
        let registry = registry(SealingPolicy::Batched);
        trusted(&registry, "I1");
        let err = registry
            .register_institution(Institution::new("I1", "Other", "Madurai", true))
            .unwrap_err();
        assert!(matches!(err, ChainError::DuplicateInstitution(id) if id == "I1"));
        assert_eq!(registry.pending_transactions().len(), 1);
    }

    #[test]
    fn test_register_student_emits_transaction() {
        let registry = registry(SealingPolicy::Batched);
        registry.register_student(Student::new("S1", "Asha")).unwrap();
        assert!(matches!(
            registry.register_student(Student::new("S1", "Asha")),
            Err(ChainError::DuplicateStudent(_))
        ));
        let pending = registry.pending_transactions();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].type_name(), "STUDENT_REGISTRATION");
    }

    #[test]
    fn test_issue_checks_in_order() {
        let registry = registry(SealingPolicy::Batched);
        let credential = Credential::new("C1", "S1", "I9", "B.Tech");
        assert!(matches!(
            registry.issue_credential(credential.clone(), "I9"),
            Err(ChainError::InstitutionNotFound(_))
        ));

        registry
            .register_institution(Institution::new("I2", "Unverified", "Salem", false))
            .unwrap();
        assert!(matches!(
            registry.issue_credential(Credential::new("C1", "S1", "I2", "B.Tech"), "I2"),
            Err(ChainError::InstitutionNotVerified(_))
        ));

        trusted(&registry, "I1");
        let invalid = Credential::new("", "", "I1", "");
        match registry.issue_credential(invalid, "I1") {
            Err(ChainError::ValidationError(errors)) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert!(fields.contains(&"credential_id"));
                assert!(fields.contains(&"student_id"));
                assert!(fields.contains(&"title"));
            }
            other => panic!("expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_batched_issue_stays_pending_until_mined() {
        let registry = registry(SealingPolicy::Batched);
        trusted(&registry, "I1");
        let receipt = registry
            .issue_credential(Credential::new("C1", "S1", "I1", "B.Tech"), "I1")
            .unwrap();
        assert!(!receipt.is_sealed());
        assert_eq!(registry.credential("C1").unwrap().status, CredentialStatus::Issued);
        // auto-registered student
        assert_eq!(registry.student("S1").unwrap().institution_id.as_deref(), Some("I1"));

        assert!(matches!(
            registry.verify_credential("C1"),
            Err(ChainError::NotFoundInLedger(_))
        ));

        let block = registry.mine_pending("SYSTEM").unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(registry.credential("C1").unwrap().status, CredentialStatus::Sealed);

        let verification = registry.verify_credential("C1").unwrap();
        assert!(verification.valid);
        assert_eq!(verification.block_index, 1);
        assert_eq!(verification.transaction_id, receipt.transaction_id);
        assert_eq!(registry.credential("C1").unwrap().status, CredentialStatus::Verified);
    }

    #[test]
    fn test_synchronous_issue_seals_immediately() {
        let registry = registry(SealingPolicy::Synchronous);
        trusted(&registry, "I1");
        let receipt = registry
            .issue_credential(Credential::new("C1", "S1", "I1", "B.Tech"), "I1")
            .unwrap();
        assert_eq!(receipt.block_index, Some(1));
        assert!(registry.pending_transactions().is_empty());
        assert_eq!(registry.credential("C1").unwrap().status, CredentialStatus::Sealed);
    }

    #[test]
    fn test_verify_reports_untrusted_issuer_and_tampering() {
        let registry = registry(SealingPolicy::Synchronous);
        trusted(&registry, "I1");
        registry
            .issue_credential(Credential::new("C1", "S1", "I1", "B.Tech"), "I1")
            .unwrap();

        registry.state.write().credentials.get_mut("C1").unwrap().title = "M.Tech".to_string();
        let verification = registry.verify_credential("C1").unwrap();
        assert!(!verification.valid);
        assert!(verification.reason.unwrap().contains("fingerprint"));

        registry.state.write().credentials.get_mut("C1").unwrap().title = "B.Tech".to_string();
        registry.state.write().institutions.get_mut("I1").unwrap().is_verified = false;
        let verification = registry.verify_credential("C1").unwrap();
        assert!(!verification.valid);
        assert_eq!(registry.credential("C1").unwrap().status, CredentialStatus::Sealed);
    }

    #[test]
    fn test_verify_unknown_credential() {
        let registry = registry(SealingPolicy::Batched);
        assert!(matches!(
            registry.verify_credential("nope"),
            Err(ChainError::CredentialNotFound(_))
        ));
    }

    #[test]
    fn test_reject_credential() {
        let registry = registry(SealingPolicy::Synchronous);
        trusted(&registry, "I1");
        registry
            .issue_credential(Credential::new("C1", "S1", "I1", "B.Tech"), "I1")
            .unwrap();
        registry.reject_credential("C1").unwrap();
        assert_eq!(registry.credential("C1").unwrap().status, CredentialStatus::Rejected);
        assert!(!registry.verify_credential("C1").unwrap().valid);
        assert!(registry.reject_credential("missing").is_err());
    }

    #[test]
    fn test_research_paper_submission() {
        let registry = registry(SealingPolicy::Batched);
        let paper = ResearchPaper::new("P1", "Ledgers", vec!["A. Author".to_string()], "I1");
        assert!(matches!(
            registry.submit_research_paper(paper.clone(), "I1"),
            Err(ChainError::InstitutionNotFound(_))
        ));

        trusted(&registry, "I1");
        let receipt = registry.submit_research_paper(paper.clone(), "I1").unwrap();
        assert_eq!(receipt.paper_hash, paper.calculate_hash());
        assert!(matches!(
            registry.submit_research_paper(paper, "I1"),
            Err(ChainError::DuplicateResearchPaper(_))
        ));
        assert!(registry.research_paper("P1").is_some());
    }

    #[test]
    fn test_certificate_upload_enqueued() {
        let registry = registry(SealingPolicy::Batched);
        let upload = CertificateUpload::from_file_bytes("S1", "Asha", "Loyola College", b"%PDF");
        let id = registry.record_certificate_upload(&upload).unwrap();
        assert!(id.starts_with("CERT_"));
        let pending = registry.pending_transactions();
        assert_eq!(pending[0].type_name(), "CERTIFICATE_UPLOAD");
    }

    #[test]
    fn test_search_and_lookups() {
        let registry = registry(SealingPolicy::Batched);
        registry
            .register_institution(Institution::new("I1", "Loyola College", "Chennai", true))
            .unwrap();
        registry
            .register_institution(Institution::new("I2", "Anna University", "Chennai", true))
            .unwrap();
        registry.register_student(Student::new("S1", "Asha Kumar")).unwrap();

        registry
            .issue_credential(
                Credential::new("C1", "S1", "I1", "B.Sc Physics")
                    .with_field_of_study("Physics")
                    .with_level(CredentialLevel::Undergraduate),
                "I1",
            )
            .unwrap();
        registry
            .issue_credential(
                Credential::new("C2", "S2", "I2", "M.E. Computer Science")
                    .with_student_name("Ravi")
                    .with_field_of_study("Computer Science")
                    .with_level(CredentialLevel::Postgraduate),
                "I2",
            )
            .unwrap();

        let by_student = registry.search_credentials(&CredentialQuery {
            student_name: Some("asha".to_string()),
            ..CredentialQuery::default()
        });
        assert_eq!(by_student.len(), 1);
        assert_eq!(by_student[0].credential_id, "C1");

        let by_institution = registry.search_credentials(&CredentialQuery {
            institution_name: Some("ANNA".to_string()),
            ..CredentialQuery::default()
        });
        assert_eq!(by_institution[0].credential_id, "C2");

        let by_level = registry.search_credentials(&CredentialQuery {
            level: Some(CredentialLevel::Postgraduate),
            field_of_study: Some("computer".to_string()),
            ..CredentialQuery::default()
        });
        assert_eq!(by_level.len(), 1);

        assert_eq!(registry.search_credentials(&CredentialQuery::default()).len(), 2);
        assert_eq!(registry.student_credentials("S1").len(), 1);
        assert_eq!(registry.institution_credentials("I2").len(), 1);
    }

    #[test]
    fn test_statistics() {
        let registry = registry(SealingPolicy::Synchronous);
        trusted(&registry, "I1");
        registry
            .register_institution(Institution::new("I2", "Pending Institute", "Salem", false))
            .unwrap();
        registry
            .issue_credential(
                Credential::new("C1", "S1", "I1", "B.Tech")
                    .with_level(CredentialLevel::Undergraduate),
                "I1",
            )
            .unwrap();

        let stats = registry.statistics();
        assert_eq!(stats.total_credentials, 1);
        assert_eq!(stats.total_institutions, 2);
        assert_eq!(stats.verified_institutions, 1);
        assert_eq!(stats.total_students, 1);
        assert_eq!(stats.pending_transactions, 0);
        assert_eq!(stats.credential_types.get("degree"), Some(&1));
        assert_eq!(stats.credential_levels.get("undergraduate"), Some(&1));
        assert_eq!(stats.blockchain_length, 2);
        assert!(stats.is_valid);
    }

    #[test]
    fn test_snapshot_and_pending_restored() {
        let store = InMemoryPersistence::new();
        let config = LedgerConfig {
            difficulty: 1,
            sealing: SealingPolicy::Batched,
            ..LedgerConfig::default()
        };

        {
            let node = LedgerNode::new(config.clone(), Box::new(store.clone())).unwrap();
            let registry =
                CredentialRegistry::new(Arc::new(node), &InstitutionDirectory::empty()).unwrap();
            trusted(&registry, "I1");
            registry
                .issue_credential(Credential::new("C1", "S1", "I1", "B.Tech"), "I1")
                .unwrap();
            registry.mine_pending("SYSTEM").unwrap();
            registry
                .issue_credential(Credential::new("C2", "S1", "I1", "M.Tech"), "I1")
                .unwrap();
        }

        let node = LedgerNode::new(config, Box::new(store)).unwrap();
        let registry =
            CredentialRegistry::new(Arc::new(node), &InstitutionDirectory::builtin()).unwrap();
        assert_eq!(registry.credential("C1").unwrap().status, CredentialStatus::Sealed);
        assert_eq!(registry.credential("C2").unwrap().status, CredentialStatus::Issued);
        assert_eq!(registry.pending_transactions().len(), 1);
        assert!(registry.institution("iitm_001").is_some());

        registry.mine_pending("SYSTEM").unwrap();
        assert!(registry.verify_credential("C2").unwrap().valid);
    }

    #[test]
    fn test_issuance_requeued_when_pending_set_lost() {
        let store = InMemoryPersistence::new();
        let config = LedgerConfig {
            difficulty: 1,
            sealing: SealingPolicy::Batched,
            ..LedgerConfig::default()
        };

        {
            let node = LedgerNode::new(config.clone(), Box::new(store.clone())).unwrap();
            let registry =
                CredentialRegistry::new(Arc::new(node), &InstitutionDirectory::empty()).unwrap();
            trusted(&registry, "I1");
            registry
                .issue_credential(Credential::new("C1", "S1", "I1", "B.Tech"), "I1")
                .unwrap();
        }
        store.save_pending(&[]).unwrap();

        let node = LedgerNode::new(config, Box::new(store)).unwrap();
        let registry =
            CredentialRegistry::new(Arc::new(node), &InstitutionDirectory::empty()).unwrap();
        let pending = registry.pending_transactions();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].credential_id(), Some("C1"));
    }

    #[test]
    fn test_export_includes_chain() {
        let registry = registry(SealingPolicy::Synchronous);
        trusted(&registry, "I1");
        registry
            .issue_credential(Credential::new("C1", "S1", "I1", "B.Tech"), "I1")
            .unwrap();
        let export = registry.export();
        assert_eq!(export.blockchain.len(), 2);
        assert!(export.snapshot.credentials.contains_key("C1"));
        let json = serde_json::to_value(&export).unwrap();
        assert!(json.get("institutions").is_some());
        assert!(json.get("blockchain").is_some());
    }
}
