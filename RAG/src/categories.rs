use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};

pub const EXTRACTION_SYSTEM_PROMPT: &str =
    "You extract information from a medicine dataset and return them in a structured JSON format.";

const SCHEMA_NAME: &str = "medicine_extraction_schema";

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub key: String,
    pub label: String,
    pub description: String,
}

impl Category {
    pub fn new(key: &str, label: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            description: description.to_string(),
        }
    }
}

/// The categories pulled out of every record and every query.
#[derive(Debug, Clone)]
pub struct CategorySet {
    categories: Vec<Category>,
}

impl CategorySet {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }

    pub fn medicine() -> Self {
        Self::new(vec![
            Category::new(
                "sideEffects",
                "Side effects",
                "what are the possible side effects of the medication",
            ),
            Category::new(
                "uses",
                "Uses",
                "what conditions the medication is used to treat",
            ),
            Category::new(
                "substitutes",
                "Substitutes",
                "which medicines can substitute it",
            ),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn keys(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn extraction_prompt(&self, data: &str) -> String {
        let fields = self
            .categories
            .iter()
            .map(|c| format!("  - {}: {}.", c.label, c.description))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Extract or predict the following information from the given the data:\n{}\n\nData:\n{}",
            fields, data
        )
    }

    /// `response_format` payload forcing the model to return one string per category.
    pub fn response_format(&self) -> Value {
        let mut properties = Map::new();
        for category in &self.categories {
            properties.insert(
                category.key.clone(),
                json!({
                    "description": category.label,
                    "type": "string",
                }),
            );
        }

        json!({
            "type": "json_schema",
            "json_schema": {
                "name": SCHEMA_NAME,
                "strict": true,
                "schema": {
                    "type": "object",
                    "properties": properties,
                    "required": self.keys(),
                    "additionalProperties": false,
                }
            }
        })
    }
}

/// Category texts extracted from one record or query, in category order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedCategories {
    entries: Vec<(String, String)>,
}

impl ExtractedCategories {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(_, v): &(String, String)| !v.trim().is_empty())
                .collect(),
        }
    }

    /// Parses the model's JSON reply, keeping the order of `set`.
    ///
    /// Keys outside `set` are ignored. Non-string values keep their JSON text.
    pub fn parse(content: &str, set: &CategorySet) -> Result<Self> {
        let value: Value = serde_json::from_str(content.trim())
            .map_err(|e| anyhow!("extraction reply is not JSON: {} ({})", e, content))?;
        let object = value
            .as_object()
            .ok_or_else(|| anyhow!("extraction reply is not a JSON object: {}", content))?;

        let pairs = set.iter().filter_map(|category| {
            let text = match object.get(&category.key)? {
                Value::Null => return None,
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            Some((category.key.clone(), text))
        });

        Ok(Self::from_pairs(pairs))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
