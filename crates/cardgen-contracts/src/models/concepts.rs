use indexmap::IndexMap;

/// A named design theme known to the prompt builder and the batch scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptSpec {
    pub name: String,
    pub style: String,
    pub priority_weight: i64,
}

#[derive(Debug, Clone)]
pub struct ConceptCatalog {
    concepts: IndexMap<String, ConceptSpec>,
}

pub const DEFAULT_CONCEPT_STYLE: &str = "Premium professional";

impl ConceptCatalog {
    pub fn new(concepts: Option<IndexMap<String, ConceptSpec>>) -> Self {
        Self {
            concepts: concepts.unwrap_or_else(default_concepts),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ConceptSpec> {
        self.concepts.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.concepts.keys().cloned().collect()
    }

    /// Style line for the prompt; unknown concepts get a generic style.
    pub fn style_for(&self, name: &str) -> &str {
        self.get(name)
            .map(|spec| spec.style.as_str())
            .unwrap_or(DEFAULT_CONCEPT_STYLE)
    }

    pub fn priority_weight(&self, name: &str) -> i64 {
        self.get(name).map(|spec| spec.priority_weight).unwrap_or(0)
    }
}

impl Default for ConceptCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_concepts() -> IndexMap<String, ConceptSpec> {
    let mut map = IndexMap::new();
    let mut insert = |name: &str, style: &str, priority_weight: i64| {
        map.insert(
            name.to_string(),
            ConceptSpec {
                name: name.to_string(),
                style: style.to_string(),
                priority_weight,
            },
        );
    };

    insert(
        "Clinical-Precision",
        "Medical authority focus, symmetric layout, clinical trust",
        3,
    );
    insert(
        "Athletic-Edge",
        "Dynamic energy, performance-focused design elements",
        2,
    );
    insert(
        "Luxury-Wellness",
        "Equinox-level luxury, spa-like sophistication",
        1,
    );

    map
}
