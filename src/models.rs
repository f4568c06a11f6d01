use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Catalog member definition as returned by the procedure. Only the ID is
/// interpreted; everything else is carried through to the partner untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberDef {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub project_code: Option<String>,
    #[serde(default)]
    pub member_def: MemberDef,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogEntry {
    /// Member ID with the last dash segment removed, e.g. `4409-008-nowcast`
    /// for `4409-008-nowcast-swan`. An ID without a dash is its own family.
    pub fn family_id(&self) -> &str {
        let id = self.member_def.id.as_str();
        match id.rsplit_once('-') {
            Some((family, _)) => family,
            None => id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PastRunEntry {
    #[serde(default)]
    pub project_code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload produced by the catalog procedure and, after filtering, sent to
/// the partner. `None` and an empty vector both mean "no rows".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogResult {
    #[serde(default)]
    pub catalogs: Option<Vec<CatalogEntry>>,
    #[serde(default)]
    pub past_runs: Option<Vec<PastRunEntry>>,
    /// Deployment label; stamped right before delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogResult {
    pub fn catalogs(&self) -> &[CatalogEntry] {
        self.catalogs.as_deref().unwrap_or_default()
    }

    pub fn past_runs(&self) -> &[PastRunEntry] {
        self.past_runs.as_deref().unwrap_or_default()
    }

    pub fn has_catalogs(&self) -> bool {
        !self.catalogs().is_empty()
    }

    /// True when neither catalogs nor past runs carry any rows.
    pub fn is_empty(&self) -> bool {
        self.catalogs().is_empty() && self.past_runs().is_empty()
    }
}

/// Ordered set of project codes the partner accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptedProjects {
    codes: IndexSet<String>,
}

impl AcceptedProjects {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let codes = codes
            .into_iter()
            .map(Into::into)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        Self { codes }
    }

    /// Parse a comma-separated list such as `"lffs, ncsc123_gfs,,nopp"`.
    /// Blank items are ignored and duplicates keep their first position.
    pub fn from_csv(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    /// Membership test for an optional code; a missing code is never accepted.
    pub fn accepts(&self, code: Option<&str>) -> bool {
        code.is_some_and(|c| self.contains(c))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }
}
