/// Validation logic for transactions and the records they are built from
use crate::error::{ChainError, FieldError};
use crate::models::{Credential, Institution, ResearchPaper, Student};
use crate::transaction::types::{Transaction, TransactionKind};

pub const MAX_ID_LENGTH: usize = 128;
pub const MAX_TITLE_LENGTH: usize = 256;

fn is_valid_id(id: &str) -> bool {
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn check_id(errors: &mut Vec<FieldError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError::new(field, "is required"));
    } else if value.len() > MAX_ID_LENGTH {
        errors.push(FieldError::new(
            field,
            format!("exceeds {} characters", MAX_ID_LENGTH),
        ));
    } else if !is_valid_id(value) {
        errors.push(FieldError::new(
            field,
            "may only contain letters, digits, '-', '_' and '.'",
        ));
    }
}

fn check_title(errors: &mut Vec<FieldError>, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError::new("title", "is required"));
    } else if value.len() > MAX_TITLE_LENGTH {
        errors.push(FieldError::new(
            "title",
            format!("exceeds {} characters", MAX_TITLE_LENGTH),
        ));
    }
}

/// Check a credential before issuance by `issuer_id`.
///
/// Every offending field is reported, not just the first.
pub fn validate_credential(credential: &Credential, issuer_id: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();

    check_id(&mut errors, "credential_id", &credential.credential_id);
    check_id(&mut errors, "student_id", &credential.student_id);
    check_id(&mut errors, "institution_id", &credential.institution_id);
    check_title(&mut errors, &credential.title);

    if !credential.institution_id.is_empty() && credential.institution_id != issuer_id {
        errors.push(FieldError::new(
            "institution_id",
            format!("does not match issuing institution '{}'", issuer_id),
        ));
    }

    // One day of slack: issuers east of UTC are already on tomorrow's date.
    let today = chrono::Utc::now().date_naive();
    let latest_issue_date = today.succ_opt().unwrap_or(today);
    if credential.issue_date > latest_issue_date {
        errors.push(FieldError::new("issue_date", "cannot be in the future"));
    }
    if let Some(expiry) = credential.expiry_date {
        if expiry <= credential.issue_date {
            errors.push(FieldError::new("expiry_date", "must be after issue_date"));
        }
    }

    errors
}

/// Check a research paper before submission.
pub fn validate_research_paper(paper: &ResearchPaper) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_id(&mut errors, "paper_id", &paper.paper_id);
    check_id(&mut errors, "institution_id", &paper.institution_id);
    check_title(&mut errors, &paper.title);
    if paper.authors.iter().all(|a| a.trim().is_empty()) {
        errors.push(FieldError::new("authors", "at least one author is required"));
    }
    errors
}

fn check_name(errors: &mut Vec<FieldError>, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError::new("name", "is required"));
    } else if value.len() > MAX_TITLE_LENGTH {
        errors.push(FieldError::new(
            "name",
            format!("exceeds {} characters", MAX_TITLE_LENGTH),
        ));
    }
}

pub fn validate_institution(institution: &Institution) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_id(&mut errors, "institution_id", &institution.institution_id);
    check_name(&mut errors, &institution.name);
    errors
}

pub fn validate_student(student: &Student) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_id(&mut errors, "student_id", &student.student_id);
    check_name(&mut errors, &student.name);
    if let Some(email) = &student.email {
        if !email.contains('@') {
            errors.push(FieldError::new("email", "is not a valid address"));
        }
    }
    errors
}

impl Transaction {
    /// Stateless checks applied before a transaction enters the pool.
    pub fn validate(&self) -> Result<(), ChainError> {
        self.validate_size()?;

        let missing = |what: &str| -> Result<(), ChainError> {
            Err(ChainError::InvalidTransaction(format!(
                "{} transaction is missing {}",
                self.type_name(),
                what
            )))
        };

        match &self.kind {
            TransactionKind::InstitutionRegistration(tx) if tx.institution_id.is_empty() => {
                missing("institution_id")
            }
            TransactionKind::StudentRegistration(tx) if tx.student_id.is_empty() => {
                missing("student_id")
            }
            TransactionKind::CredentialIssuance(tx) if tx.credential_id.is_empty() => {
                missing("credential_id")
            }
            TransactionKind::ResearchPaperSubmission(tx) if tx.paper_id.is_empty() => {
                missing("paper_id")
            }
            TransactionKind::CertificateUpload(tx) if tx.file_hash.len() != 64 => {
                Err(ChainError::InvalidTransaction(
                    "Upload file_hash must be a SHA-256 hex digest".to_string(),
                ))
            }
            TransactionKind::MiningReward(tx) if tx.beneficiary.is_empty() => {
                missing("beneficiary")
            }
            TransactionKind::Custom(tx) if tx.label.is_empty() => missing("label"),
            _ => Ok(()),
        }
    }
}
