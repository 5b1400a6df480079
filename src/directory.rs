//! Read-only institution catalog
//!
//! Seeds the registry's institution map when it is created. Entries come
//! from the built-in list below and, optionally, a JSON file holding an
//! array of institutions in the same shape.

use crate::config::DirectoryConfig;
use crate::error::ChainError;
use crate::models::{Institution, InstitutionType};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[allow(clippy::too_many_arguments)]
fn entry(
    id: &str,
    name: &str,
    affiliation: &str,
    location: &str,
    institution_type: InstitutionType,
    established: i32,
    category: &str,
    courses: &[&str],
) -> Institution {
    Institution {
        institution_id: id.to_string(),
        name: name.to_string(),
        location: location.to_string(),
        affiliation: affiliation.to_string(),
        institution_type: Some(institution_type),
        is_verified: true,
        established: Some(established),
        courses: courses.iter().map(|c| c.to_string()).collect(),
        category: Some(category.to_string()),
    }
}

static BUILTIN: Lazy<Vec<Institution>> = Lazy::new(|| {
    vec![
        entry(
            "iitm_001",
            "Indian Institute of Technology Madras (IIT Madras)",
            "University of Madras",
            "Chennai, Tamil Nadu",
            InstitutionType::Engineering,
            1959,
            "IIT",
            &[
                "Bachelor of Technology (BTech)",
                "Bachelor of Technology (BTech Computer Science & Engineering)",
                "Bachelor of Technology (BTech Mechanical Engineering)",
            ],
        ),
        entry(
            "loyola_001",
            "Loyola College",
            "University of Madras",
            "Chennai, Tamil Nadu",
            InstitutionType::ArtsScience,
            1925,
            "Autonomous College",
            &[
                "Bachelor of Arts (BA)",
                "Bachelor of Science (BSc)",
                "Master of Computer Applications (MCA)",
            ],
        ),
        entry(
            "anna_university_001",
            "Anna University",
            "State University",
            "Chennai, Tamil Nadu",
            InstitutionType::Engineering,
            1978,
            "State University",
            &[
                "Bachelor of Engineering (BE)",
                "Master of Engineering (ME)",
                "Doctor of Philosophy (PhD)",
            ],
        ),
        entry(
            "nit_trichy_001",
            "National Institute of Technology Tiruchirappalli (NIT Trichy)",
            "NIT System",
            "Tiruchirappalli, Tamil Nadu",
            InstitutionType::Engineering,
            1964,
            "NIT",
            &[
                "Bachelor of Technology (BTech)",
                "Master of Technology (MTech)",
                "Doctor of Philosophy (PhD)",
            ],
        ),
        entry(
            "psg_coimbatore_001",
            "PSG College of Technology",
            "Anna University",
            "Coimbatore, Tamil Nadu",
            InstitutionType::Engineering,
            1951,
            "Autonomous College",
            &["Bachelor of Engineering (BE)", "Master of Engineering (ME)"],
        ),
        entry(
            "madras_christian_001",
            "Madras Christian College",
            "University of Madras",
            "Chennai, Tamil Nadu",
            InstitutionType::ArtsScience,
            1837,
            "Autonomous College",
            &["Bachelor of Arts (BA)", "Master of Science (MSc)"],
        ),
        entry(
            "nift_001",
            "National Institute of Fashion Technology (NIFT) Chennai",
            "Ministry of Textiles",
            "Chennai, Tamil Nadu",
            InstitutionType::Other,
            1995,
            "Fashion Institute",
            &["Bachelor of Design (BDes)", "Master of Design (MDes)"],
        ),
        entry(
            "tnmgrmu_001",
            "The Tamil Nadu Dr. M.G.R. Medical University",
            "State University",
            "Chennai, Tamil Nadu",
            InstitutionType::Medical,
            1988,
            "Medical University",
            &[
                "Bachelor of Medicine and Bachelor of Surgery (MBBS)",
                "Master of Surgery (MS)",
                "Doctor of Medicine (DM)",
            ],
        ),
    ]
});

/// Immutable lookup of known institutions by id.
#[derive(Debug, Clone, Default)]
pub struct InstitutionDirectory {
    institutions: BTreeMap<String, Institution>,
}

impl InstitutionDirectory {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The compiled-in catalog.
    pub fn builtin() -> Self {
        Self::from_institutions(BUILTIN.iter().cloned())
    }

    pub fn from_institutions(institutions: impl IntoIterator<Item = Institution>) -> Self {
        let institutions = institutions
            .into_iter()
            .map(|inst| (inst.institution_id.clone(), inst))
            .collect();
        InstitutionDirectory { institutions }
    }

    /// Load a JSON array of institutions.
    pub fn load(path: &Path) -> Result<Self, ChainError> {
        let contents = fs::read_to_string(path)?;
        let institutions: Vec<Institution> = serde_json::from_str(&contents).map_err(|e| {
            ChainError::SerializationError(format!(
                "Failed to parse institution directory {}: {}",
                path.display(),
                e
            ))
        })?;

        if let Some(bad) = institutions
            .iter()
            .find(|inst| inst.institution_id.trim().is_empty() || inst.name.trim().is_empty())
        {
            return Err(ChainError::ConfigError(format!(
                "Directory entry '{}' is missing an id or name",
                bad.institution_id
            )));
        }

        debug!("Loaded {} institutions from {}", institutions.len(), path.display());
        Ok(Self::from_institutions(institutions))
    }

    /// Build the directory described by `config`. File entries override
    /// built-in ones with the same id.
    pub fn from_config(config: &DirectoryConfig) -> Result<Self, ChainError> {
        let mut directory = if config.seed_builtin {
            Self::builtin()
        } else {
            Self::empty()
        };
        if let Some(path) = &config.path {
            directory.merge(Self::load(path)?);
        }
        info!("Institution directory holds {} entries", directory.len());
        Ok(directory)
    }

    pub fn merge(&mut self, other: InstitutionDirectory) {
        self.institutions.extend(other.institutions);
    }

    pub fn get(&self, institution_id: &str) -> Option<&Institution> {
        self.institutions.get(institution_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Institution> {
        self.institutions.values()
    }

    /// Case-insensitive match on name, affiliation or offered course,
    /// optionally restricted to one category.
    pub fn search(&self, query: &str, category: Option<&str>) -> Vec<&Institution> {
        let query = query.to_lowercase();
        self.iter()
            .filter(|inst| {
                query.is_empty()
                    || inst.name.to_lowercase().contains(&query)
                    || inst.affiliation.to_lowercase().contains(&query)
                    || inst.courses.iter().any(|c| c.to_lowercase().contains(&query))
            })
            .filter(|inst| category.is_none() || inst.category.as_deref() == category)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.institutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.institutions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_catalog() {
        let directory = InstitutionDirectory::builtin();
        assert!(!directory.is_empty());
        let iitm = directory.get("iitm_001").unwrap();
        assert!(iitm.is_verified);
        assert_eq!(iitm.established, Some(1959));
        assert!(directory.iter().all(|inst| inst.is_verified));
    }

    #[test]
    fn test_search() {
        let directory = InstitutionDirectory::builtin();
        let hits = directory.search("madras", None);
        assert!(hits.iter().any(|inst| inst.institution_id == "loyola_001"));

        let nits = directory.search("", Some("NIT"));
        assert_eq!(nits.len(), 1);
        assert_eq!(nits[0].institution_id, "nit_trichy_001");

        assert!(directory.search("phd", None).len() >= 2);
    }

    #[test]
    fn test_file_entries_override_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"institution_id": "iitm_001", "name": "IIT Madras",
                  "location": "Chennai", "verified": false}},
                {{"institution_id": "new_001", "name": "New College",
                  "location": "Madurai", "verified": true}}
            ]"#
        )
        .unwrap();

        let config = DirectoryConfig {
            seed_builtin: true,
            path: Some(file.path().to_path_buf()),
        };
        let directory = InstitutionDirectory::from_config(&config).unwrap();
        assert!(!directory.get("iitm_001").unwrap().is_verified);
        assert!(directory.get("new_001").is_some());
        assert!(directory.get("loyola_001").is_some());
    }

    #[test]
    fn test_rejects_nameless_entry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"institution_id": "x", "name": " ", "location": "y"}}]"#).unwrap();
        assert!(matches!(
            InstitutionDirectory::load(file.path()),
            Err(ChainError::ConfigError(_))
        ));
    }
}
