//! Academic records held by the credential registry
//!
//! These are the registry's own maps, not ledger contents. The ledger only
//! sees the transactions the registry emits for them.

use crate::crypto::sha256_hex;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Degree,
    Certificate,
    Diploma,
    Transcript,
    ResearchPaper,
    Other,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::Degree => "degree",
            CredentialType::Certificate => "certificate",
            CredentialType::Diploma => "diploma",
            CredentialType::Transcript => "transcript",
            CredentialType::ResearchPaper => "research_paper",
            CredentialType::Other => "other",
        }
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CredentialType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "degree" => Ok(CredentialType::Degree),
            "certificate" => Ok(CredentialType::Certificate),
            "diploma" => Ok(CredentialType::Diploma),
            "transcript" => Ok(CredentialType::Transcript),
            "research_paper" => Ok(CredentialType::ResearchPaper),
            "other" => Ok(CredentialType::Other),
            other => Err(format!("unknown credential type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialLevel {
    Secondary,
    Undergraduate,
    Postgraduate,
    Doctoral,
    Professional,
}

impl CredentialLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialLevel::Secondary => "secondary",
            CredentialLevel::Undergraduate => "undergraduate",
            CredentialLevel::Postgraduate => "postgraduate",
            CredentialLevel::Doctoral => "doctoral",
            CredentialLevel::Professional => "professional",
        }
    }
}

impl std::str::FromStr for CredentialLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secondary" => Ok(CredentialLevel::Secondary),
            "undergraduate" => Ok(CredentialLevel::Undergraduate),
            "postgraduate" => Ok(CredentialLevel::Postgraduate),
            "doctoral" => Ok(CredentialLevel::Doctoral),
            "professional" => Ok(CredentialLevel::Professional),
            other => Err(format!("unknown credential level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionType {
    Engineering,
    Medical,
    ArtsScience,
    Management,
    Polytechnic,
    Research,
    Other,
}

/// Lifecycle of an issued credential.
///
/// `Issued -> Sealed -> Verified`; `Rejected` is only set from outside the
/// ledger through [`crate::registry::CredentialRegistry::reject_credential`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    #[default]
    Issued,
    Sealed,
    Verified,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub institution_id: String,
    pub name: String,
    pub location: String,
    #[serde(default = "default_affiliation")]
    pub affiliation: String,
    #[serde(default, rename = "type")]
    pub institution_type: Option<InstitutionType>,
    #[serde(default, rename = "verified")]
    pub is_verified: bool,
    #[serde(default)]
    pub established: Option<i32>,
    #[serde(default)]
    pub courses: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_affiliation() -> String {
    "Independent".to_string()
}

impl Institution {
    pub fn new(institution_id: &str, name: &str, location: &str, is_verified: bool) -> Self {
        Institution {
            institution_id: institution_id.to_string(),
            name: name.to_string(),
            location: location.to_string(),
            affiliation: default_affiliation(),
            institution_type: None,
            is_verified,
            established: None,
            courses: Vec::new(),
            category: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub institution_id: Option<String>,
    pub enrolled_date: DateTime<Utc>,
}

impl Student {
    pub fn new(student_id: &str, name: &str) -> Self {
        Student {
            student_id: student_id.to_string(),
            name: name.to_string(),
            email: None,
            institution_id: None,
            enrolled_date: Utc::now(),
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_institution(mut self, institution_id: &str) -> Self {
        self.institution_id = Some(institution_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: String,
    pub title: String,
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    pub institution_id: String,
    pub credential_type: CredentialType,
    #[serde(default)]
    pub level: Option<CredentialLevel>,
    #[serde(default)]
    pub field_of_study: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub issue_date: NaiveDate,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: CredentialStatus,
}

impl Credential {
    /// A degree issued today with no optional attributes set.
    pub fn new(credential_id: &str, student_id: &str, institution_id: &str, title: &str) -> Self {
        Credential {
            credential_id: credential_id.to_string(),
            title: title.to_string(),
            student_id: student_id.to_string(),
            student_name: None,
            institution_id: institution_id.to_string(),
            credential_type: CredentialType::Degree,
            level: None,
            field_of_study: None,
            grade: None,
            description: None,
            issue_date: Utc::now().date_naive(),
            expiry_date: None,
            status: CredentialStatus::Issued,
        }
    }

    pub fn with_type(mut self, credential_type: CredentialType) -> Self {
        self.credential_type = credential_type;
        self
    }

    pub fn with_level(mut self, level: CredentialLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_field_of_study(mut self, field: &str) -> Self {
        self.field_of_study = Some(field.to_string());
        self
    }

    pub fn with_student_name(mut self, name: &str) -> Self {
        self.student_name = Some(name.to_string());
        self
    }

    pub fn with_grade(mut self, grade: &str) -> Self {
        self.grade = Some(grade.to_string());
        self
    }

    /// Content fingerprint of the credential: SHA-256 over its canonical
    /// JSON form (sorted keys). `status` is excluded so the fingerprint is
    /// stable across the credential's lifecycle.
    pub fn calculate_hash(&self) -> String {
        let canonical = json!({
            "credential_id": self.credential_id,
            "title": self.title,
            "student_id": self.student_id,
            "student_name": self.student_name,
            "institution_id": self.institution_id,
            "credential_type": self.credential_type,
            "level": self.level,
            "field_of_study": self.field_of_study,
            "grade": self.grade,
            "description": self.description,
            "issue_date": self.issue_date,
            "expiry_date": self.expiry_date,
        });
        sha256_hex(canonical.to_string().as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchPaper {
    pub paper_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub institution_id: String,
    pub publication_date: NaiveDate,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub journal: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl ResearchPaper {
    pub fn new(paper_id: &str, title: &str, authors: Vec<String>, institution_id: &str) -> Self {
        ResearchPaper {
            paper_id: paper_id.to_string(),
            title: title.to_string(),
            authors,
            institution_id: institution_id.to_string(),
            publication_date: Utc::now().date_naive(),
            abstract_text: None,
            doi: None,
            journal: None,
            keywords: Vec::new(),
        }
    }

    /// SHA-256 over the paper's canonical JSON form.
    pub fn calculate_hash(&self) -> String {
        let canonical = json!({
            "paper_id": self.paper_id,
            "title": self.title,
            "authors": self.authors,
            "institution_id": self.institution_id,
            "publication_date": self.publication_date,
            "abstract": self.abstract_text,
            "doi": self.doi,
            "journal": self.journal,
            "keywords": self.keywords,
        });
        sha256_hex(canonical.to_string().as_bytes())
    }
}

/// An externally uploaded certificate file, identified by its content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateUpload {
    pub student_id: String,
    pub student_name: String,
    pub institution_name: String,
    pub file_hash: String,
}

impl CertificateUpload {
    /// Describe an upload by hashing the raw file contents.
    pub fn from_file_bytes(
        student_id: &str,
        student_name: &str,
        institution_name: &str,
        contents: &[u8],
    ) -> Self {
        CertificateUpload {
            student_id: student_id.to_string(),
            student_name: student_name.to_string(),
            institution_name: institution_name.to_string(),
            file_hash: sha256_hex(contents),
        }
    }
}
