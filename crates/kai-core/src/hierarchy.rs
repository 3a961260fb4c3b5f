//! Organizational hierarchy: faculties, their departments and name aliases.
//!
//! The table is read-only for the lifetime of the process and shared across
//! exchanges. [`EntityIndex`] compiles the aliases once for fast mention
//! extraction.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KaiError, Result};

/// A department inside a faculty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    /// Short code, e.g. "ІПЗ".
    pub id: String,
    pub full_name: String,
    /// Alternative spellings. The id is always matched too.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A faculty and its departments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Faculty {
    pub id: String,
    pub full_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub departments: Vec<Department>,
}

/// The full organizational table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgHierarchy {
    #[serde(default = "default_faculties")]
    pub faculties: Vec<Faculty>,

    /// Substrings of a student group code that mark a technical group.
    #[serde(default = "default_technical_group_markers")]
    pub technical_group_markers: Vec<String>,

    /// Faculty assumed for technical groups.
    #[serde(default = "default_technical_faculty")]
    pub technical_faculty: String,
}

impl Default for OrgHierarchy {
    fn default() -> Self {
        Self {
            faculties: default_faculties(),
            technical_group_markers: default_technical_group_markers(),
            technical_faculty: default_technical_faculty(),
        }
    }
}

impl OrgHierarchy {
    /// Find a faculty by id or alias, case-insensitively.
    pub fn faculty(&self, name: &str) -> Option<&Faculty> {
        let needle = name.trim().to_lowercase();
        self.faculties.iter().find(|f| {
            f.id.to_lowercase() == needle || f.aliases.iter().any(|a| a.to_lowercase() == needle)
        })
    }

    /// Find a department (and its faculty) by id or alias, case-insensitively.
    pub fn department(&self, name: &str) -> Option<(&Faculty, &Department)> {
        let needle = name.trim().to_lowercase();
        self.faculties.iter().find_map(|f| {
            f.departments
                .iter()
                .find(|d| {
                    d.id.to_lowercase() == needle
                        || d.aliases.iter().any(|a| a.to_lowercase() == needle)
                })
                .map(|d| (f, d))
        })
    }

    /// Whether a student group code belongs to a technical group.
    pub fn is_technical_group(&self, group: &str) -> bool {
        let upper = group.to_uppercase();
        self.technical_group_markers
            .iter()
            .any(|m| upper.contains(&m.to_uppercase()))
    }

    /// Compact listing for reasoning-service prompts.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for faculty in &self.faculties {
            out.push_str(&format!("{} ({})\n", faculty.id, faculty.full_name));
            for dept in &faculty.departments {
                out.push_str(&format!("  - {}: {}\n", dept.id, dept.full_name));
            }
        }
        out
    }

    /// Check ids are unique and the technical faculty exists.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for f in &self.faculties {
            if !seen.insert(f.id.to_lowercase()) {
                return Err(KaiError::config(format!("duplicate hierarchy id: {}", f.id)));
            }
            for d in &f.departments {
                if !seen.insert(d.id.to_lowercase()) {
                    return Err(KaiError::config(format!("duplicate hierarchy id: {}", d.id)));
                }
            }
        }
        if !self.technical_group_markers.is_empty() && self.faculty(&self.technical_faculty).is_none() {
            return Err(KaiError::config(format!(
                "technical faculty {} is not in the hierarchy",
                self.technical_faculty
            )));
        }
        Ok(())
    }
}

/// Kind of organizational entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Faculty,
    Department,
}

/// A mention of a faculty or department found in text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMatch {
    pub kind: EntityKind,
    /// Faculty or department id.
    pub code: String,
    /// Owning faculty (equal to `code` for faculties).
    pub faculty_code: String,
    pub full_name: String,
    /// The text that matched.
    pub matched: String,
    /// Byte offset in the searched text.
    pub start: usize,
}

struct AliasPattern {
    regex: Regex,
    kind: EntityKind,
    code: String,
    faculty_code: String,
    full_name: String,
}

/// Compiled alias matcher over an [`OrgHierarchy`].
pub struct EntityIndex {
    hierarchy: OrgHierarchy,
    patterns: Vec<AliasPattern>,
}

impl EntityIndex {
    pub fn new(hierarchy: OrgHierarchy) -> Result<Self> {
        let mut patterns = Vec::new();
        for faculty in &hierarchy.faculties {
            for alias in names(&faculty.id, &faculty.aliases) {
                patterns.push(AliasPattern {
                    regex: alias_regex(&alias)?,
                    kind: EntityKind::Faculty,
                    code: faculty.id.clone(),
                    faculty_code: faculty.id.clone(),
                    full_name: faculty.full_name.clone(),
                });
            }
            for dept in &faculty.departments {
                for alias in names(&dept.id, &dept.aliases) {
                    patterns.push(AliasPattern {
                        regex: alias_regex(&alias)?,
                        kind: EntityKind::Department,
                        code: dept.id.clone(),
                        faculty_code: faculty.id.clone(),
                        full_name: dept.full_name.clone(),
                    });
                }
            }
        }
        Ok(Self {
            hierarchy,
            patterns,
        })
    }

    pub fn hierarchy(&self) -> &OrgHierarchy {
        &self.hierarchy
    }

    /// All entity mentions in `text`, in order of appearance.
    ///
    /// Matching is case-insensitive on word boundaries. Where two aliases
    /// overlap, the earlier and then the longer one wins.
    pub fn extract(&self, text: &str) -> Vec<EntityMatch> {
        let mut found: Vec<EntityMatch> = Vec::new();
        for p in &self.patterns {
            for m in p.regex.find_iter(text) {
                found.push(EntityMatch {
                    kind: p.kind,
                    code: p.code.clone(),
                    faculty_code: p.faculty_code.clone(),
                    full_name: p.full_name.clone(),
                    matched: m.as_str().to_string(),
                    start: m.start(),
                });
            }
        }
        found.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| b.matched.len().cmp(&a.matched.len()))
        });

        let mut out: Vec<EntityMatch> = Vec::with_capacity(found.len());
        let mut covered_to = 0usize;
        for m in found {
            if !out.is_empty() && m.start < covered_to {
                continue;
            }
            covered_to = m.start + m.matched.len();
            out.push(m);
        }
        out
    }
}

fn names(id: &str, aliases: &[String]) -> Vec<String> {
    let mut all = vec![id.to_string()];
    for a in aliases {
        if !all.iter().any(|x| x.to_lowercase() == a.to_lowercase()) {
            all.push(a.clone());
        }
    }
    all
}

fn alias_regex(alias: &str) -> Result<Regex> {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(alias.trim())))
        .map_err(|e| KaiError::config(format!("bad alias {:?}: {}", alias, e)))
}

// Default table

fn dept(id: &str, full_name: &str, aliases: &[&str]) -> Department {
    Department {
        id: id.to_string(),
        full_name: full_name.to_string(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
    }
}

fn default_faculties() -> Vec<Faculty> {
    vec![
        Faculty {
            id: "ФКНТ".to_string(),
            full_name: "Факультет комп'ютерних наук та технологій".to_string(),
            aliases: vec![
                "факультет комп'ютерних наук та технологій".to_string(),
                "факультет комп'ютерних наук".to_string(),
            ],
            departments: vec![
                dept(
                    "ІПЗ",
                    "Кафедра інженерії програмного забезпечення",
                    &["інженерії програмного забезпечення", "інженерія програмного забезпечення"],
                ),
                dept(
                    "КІТ",
                    "Кафедра комп'ютерних інформаційних технологій",
                    &["комп'ютерних інформаційних технологій"],
                ),
                dept(
                    "КСМ",
                    "Кафедра комп'ютерних систем та мереж",
                    &["комп'ютерних систем та мереж"],
                ),
                dept(
                    "КБ",
                    "Кафедра кібербезпеки",
                    &["кібербезпеки", "кібербезпека"],
                ),
            ],
        },
        Faculty {
            id: "ФАЕТ".to_string(),
            full_name: "Факультет аеронавігації, електроніки та телекомунікацій".to_string(),
            aliases: vec![
                "факультет аеронавігації, електроніки та телекомунікацій".to_string(),
                "факультет аеронавігації".to_string(),
            ],
            departments: vec![
                dept(
                    "ТКРС",
                    "Кафедра телекомунікаційних та радіоелектронних систем",
                    &["телекомунікаційних та радіоелектронних систем"],
                ),
                dept(
                    "АНС",
                    "Кафедра аеронавігаційних систем",
                    &["аеронавігаційних систем"],
                ),
                dept("ЕЛ", "Кафедра електроніки", &["кафедра електроніки"]),
            ],
        },
    ]
}

fn default_technical_group_markers() -> Vec<String> {
    ["ІР", "КІТ", "КІ", "ПМ", "КБ"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_technical_faculty() -> String {
    "ФКНТ".to_string()
}
