/// Transaction types for AcadChain
use crate::crypto::{short_id, update_str, Sha256Hash};
use crate::error::ChainError;
use crate::models::{
    CertificateUpload, Credential, CredentialType, Institution, ResearchPaper, Student,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// A sealed-or-pending ledger record. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,
    pub kind: TransactionKind,
}

/// The typed payload of a transaction
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    InstitutionRegistration(InstitutionRegistrationTx),
    StudentRegistration(StudentRegistrationTx),
    CredentialIssuance(CredentialIssuanceTx),
    ResearchPaperSubmission(ResearchPaperTx),
    CertificateUpload(CertificateUploadTx),
    MiningReward(MiningRewardTx),
    Custom(CustomTx),
}

impl Transaction {
    /// Stamp `kind` with the current time and derive its id.
    pub fn new(kind: TransactionKind) -> Self {
        Self::with_timestamp(kind, chrono::Utc::now().timestamp_millis())
    }

    /// Build a transaction at a fixed time. Used for the genesis marker so
    /// that its id is reproducible.
    pub fn with_timestamp(kind: TransactionKind, timestamp: i64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(timestamp.to_le_bytes());
        kind.feed(&mut hasher);
        let id = short_id(&hasher.finalize());
        Transaction { id, timestamp, kind }
    }

    /// Deterministic digest over id, timestamp and payload.
    pub fn hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        update_str(&mut hasher, &self.id);
        hasher.update(self.timestamp.to_le_bytes());
        self.kind.feed(&mut hasher);
        hasher.finalize().into()
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<(), ChainError> {
        let serialized = bincode::serialize(self)
            .map_err(|e| ChainError::InvalidTransaction(format!("Serialization failed: {}", e)))?;

        if serialized.len() > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                serialized.len(),
                MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }

    /// The credential id if this is an issuance record
    pub fn credential_id(&self) -> Option<&str> {
        match &self.kind {
            TransactionKind::CredentialIssuance(tx) => Some(&tx.credential_id),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

impl TransactionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            TransactionKind::InstitutionRegistration(_) => "INSTITUTION_REGISTRATION",
            TransactionKind::StudentRegistration(_) => "STUDENT_REGISTRATION",
            TransactionKind::CredentialIssuance(_) => "CREDENTIAL_ISSUANCE",
            TransactionKind::ResearchPaperSubmission(_) => "RESEARCH_PAPER_SUBMISSION",
            TransactionKind::CertificateUpload(_) => "CERTIFICATE_UPLOAD",
            TransactionKind::MiningReward(_) => "MINING_REWARD",
            TransactionKind::Custom(_) => "CUSTOM",
        }
    }

    fn feed(&self, hasher: &mut Sha256) {
        update_str(hasher, self.type_name());
        match self {
            TransactionKind::InstitutionRegistration(tx) => {
                update_str(hasher, &tx.institution_id);
                update_str(hasher, &tx.name);
                update_str(hasher, &tx.location);
                hasher.update([tx.verified as u8]);
            }
            TransactionKind::StudentRegistration(tx) => {
                update_str(hasher, &tx.student_id);
                update_str(hasher, &tx.name);
                update_str(hasher, tx.institution_id.as_deref().unwrap_or_default());
            }
            TransactionKind::CredentialIssuance(tx) => {
                update_str(hasher, &tx.credential_id);
                update_str(hasher, &tx.student_id);
                update_str(hasher, &tx.institution_id);
                update_str(hasher, &tx.title);
                update_str(hasher, tx.credential_type.as_str());
                update_str(hasher, &tx.credential_hash);
            }
            TransactionKind::ResearchPaperSubmission(tx) => {
                update_str(hasher, &tx.paper_id);
                update_str(hasher, &tx.title);
                update_str(hasher, &tx.institution_id);
                update_str(hasher, &tx.paper_hash);
            }
            TransactionKind::CertificateUpload(tx) => {
                update_str(hasher, &tx.certificate_id);
                update_str(hasher, &tx.student_id);
                update_str(hasher, &tx.student_name);
                update_str(hasher, &tx.institution_name);
                update_str(hasher, &tx.file_hash);
            }
            TransactionKind::MiningReward(tx) => {
                update_str(hasher, &tx.beneficiary);
                hasher.update(tx.reward.to_le_bytes());
            }
            TransactionKind::Custom(tx) => {
                update_str(hasher, &tx.label);
                // BTreeMap iterates in key order
                hasher.update((tx.fields.len() as u64).to_le_bytes());
                for (key, value) in &tx.fields {
                    update_str(hasher, key);
                    update_str(hasher, value);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InstitutionRegistrationTx {
    pub institution_id: String,
    pub name: String,
    pub location: String,
    pub verified: bool,
}

impl From<&Institution> for InstitutionRegistrationTx {
    fn from(inst: &Institution) -> Self {
        InstitutionRegistrationTx {
            institution_id: inst.institution_id.clone(),
            name: inst.name.clone(),
            location: inst.location.clone(),
            verified: inst.is_verified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StudentRegistrationTx {
    pub student_id: String,
    pub name: String,
    pub institution_id: Option<String>,
}

impl From<&Student> for StudentRegistrationTx {
    fn from(student: &Student) -> Self {
        StudentRegistrationTx {
            student_id: student.student_id.clone(),
            name: student.name.clone(),
            institution_id: student.institution_id.clone(),
        }
    }
}

/// Issuance record. Carries the credential's content hash so a verifier can
/// detect later edits to the registry copy.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CredentialIssuanceTx {
    pub credential_id: String,
    pub student_id: String,
    pub institution_id: String,
    pub title: String,
    pub credential_type: CredentialType,
    pub credential_hash: String,
}

impl From<&Credential> for CredentialIssuanceTx {
    fn from(credential: &Credential) -> Self {
        CredentialIssuanceTx {
            credential_id: credential.credential_id.clone(),
            student_id: credential.student_id.clone(),
            institution_id: credential.institution_id.clone(),
            title: credential.title.clone(),
            credential_type: credential.credential_type,
            credential_hash: credential.calculate_hash(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResearchPaperTx {
    pub paper_id: String,
    pub title: String,
    pub institution_id: String,
    pub paper_hash: String,
}

impl From<&ResearchPaper> for ResearchPaperTx {
    fn from(paper: &ResearchPaper) -> Self {
        ResearchPaperTx {
            paper_id: paper.paper_id.clone(),
            title: paper.title.clone(),
            institution_id: paper.institution_id.clone(),
            paper_hash: paper.calculate_hash(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CertificateUploadTx {
    pub certificate_id: String,
    pub student_id: String,
    pub student_name: String,
    pub institution_name: String,
    pub file_hash: String,
}

impl CertificateUploadTx {
    pub fn new(certificate_id: String, upload: &CertificateUpload) -> Self {
        CertificateUploadTx {
            certificate_id,
            student_id: upload.student_id.clone(),
            student_name: upload.student_name.clone(),
            institution_name: upload.institution_name.clone(),
            file_hash: upload.file_hash.clone(),
        }
    }
}

/// Mining reward: credits the identity that sealed a block
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MiningRewardTx {
    pub beneficiary: String,
    pub reward: u64,
}

/// Free-form record. Keys are kept in a `BTreeMap` so hashing is order-stable.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CustomTx {
    pub label: String,
    pub fields: BTreeMap<String, String>,
}

impl CustomTx {
    pub fn new(label: &str) -> Self {
        CustomTx {
            label: label.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }
}
