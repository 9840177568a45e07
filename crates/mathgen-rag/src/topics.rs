//! Topic catalog: per-topic, per-difficulty guidance for the prompt
//!
//! The built-in catalog covers the syllabus topics the corpus was extracted
//! for. Deployments can add or replace topics with a TOML file of the same
//! shape, and callers can register topics at runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::Difficulty;

/// Guidance for one difficulty level of a topic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyProfile {
    /// Expected solution length, e.g. `"3-4"`
    pub steps: String,
    /// Short English descriptor of the problem type
    pub description: String,
    /// Number range the problems should use
    pub numbers: String,
    /// Sinhala context phrase
    pub context: String,
    pub sub_topics: Vec<String>,
    pub examples: Vec<String>,
    pub formulas: Vec<String>,
}

impl DifficultyProfile {
    fn generic() -> Self {
        Self {
            steps: "3-4".to_string(),
            description: "standard problems".to_string(),
            numbers: "විචල්‍ය".to_string(),
            ..Default::default()
        }
    }
}

/// Profiles keyed by difficulty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyProfiles {
    pub easy: Option<DifficultyProfile>,
    pub medium: Option<DifficultyProfile>,
    pub hard: Option<DifficultyProfile>,
}

impl DifficultyProfiles {
    fn get(&self, difficulty: Difficulty) -> Option<&DifficultyProfile> {
        match difficulty {
            Difficulty::Easy => self.easy.as_ref(),
            Difficulty::Medium => self.medium.as_ref(),
            Difficulty::Hard => self.hard.as_ref(),
        }
    }
}

/// One catalog topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Canonical (Sinhala) topic name
    pub name: String,
    /// Other names accepted for this topic
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub difficulty: DifficultyProfiles,
    /// Topic-specific instructions appended to the prompt
    #[serde(default)]
    pub prompt_template: String,
}

impl TopicConfig {
    /// Profile for `difficulty`, falling back to medium, then to a generic profile
    pub fn profile(&self, difficulty: Difficulty) -> DifficultyProfile {
        self.difficulty
            .get(difficulty)
            .or_else(|| self.difficulty.get(Difficulty::Medium))
            .cloned()
            .unwrap_or_else(DifficultyProfile::generic)
    }

    fn matches(&self, key: &str) -> bool {
        normalize_key(&self.name) == key || self.aliases.iter().any(|a| normalize_key(a) == key)
    }
}

/// Topic guidance resolved for one request
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTopic {
    pub profile: DifficultyProfile,
    pub prompt_template: String,
    /// False when the topic is not in the catalog and generic guidance is used
    pub known: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    topic: Vec<TopicConfig>,
}

/// Catalog of known topics
#[derive(Debug, Clone, Default)]
pub struct TopicCatalog {
    topics: BTreeMap<String, TopicConfig>,
}

fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}

impl TopicCatalog {
    /// Catalog with the built-in topics
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        if let Err(e) = catalog.merge_toml(BUILTIN_CATALOG) {
            tracing::error!("Built-in topic catalog is invalid: {}", e);
        }
        catalog
    }

    /// Built-in topics plus the definitions in `path` (which take precedence)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut catalog = Self::builtin();
        if let Some(path) = path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::config(format!("Failed to read topic catalog {}: {}", path.display(), e))
            })?;
            let added = catalog.merge_toml(&content)?;
            tracing::info!("Loaded {} topics from {}", added, path.display());
        }
        Ok(catalog)
    }

    fn merge_toml(&mut self, content: &str) -> Result<usize> {
        let file: CatalogFile = toml::from_str(content)
            .map_err(|e| Error::config(format!("Invalid topic catalog: {}", e)))?;
        let count = file.topic.len();
        for topic in file.topic {
            self.add_topic(topic)?;
        }
        Ok(count)
    }

    /// Register or replace a topic
    pub fn add_topic(&mut self, topic: TopicConfig) -> Result<()> {
        let name = topic.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidRequest("topic name must not be empty".to_string()));
        }
        tracing::debug!("Registering topic {}", name);
        self.topics.insert(name.to_string(), topic);
        Ok(())
    }

    /// Canonical names of every known topic, sorted
    pub fn available_topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    /// Look up a topic by name or alias
    pub fn get(&self, topic: &str) -> Option<&TopicConfig> {
        let key = normalize_key(topic);
        self.topics
            .get(topic.trim())
            .or_else(|| self.topics.values().find(|t| t.matches(&key)))
    }

    /// Guidance for a request; unknown topics get generic guidance
    pub fn resolve(&self, topic: &str, difficulty: Difficulty) -> ResolvedTopic {
        match self.get(topic) {
            Some(config) => ResolvedTopic {
                profile: config.profile(difficulty),
                prompt_template: config.prompt_template.clone(),
                known: true,
            },
            None => {
                tracing::warn!("No configuration for topic '{}', using generic guidance", topic);
                ResolvedTopic {
                    profile: DifficultyProfile::generic(),
                    prompt_template: String::new(),
                    known: false,
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

const BUILTIN_CATALOG: &str = r#"
[[topic]]
name = "පොළිය"
aliases = ["interest", "පොලිය", "වාරික ගණනය"]
prompt_template = """
ප්‍රශ්නයේ සන්දර්භය:
- බැංකු ණය, තැන්පතු හෝ වාරික ගෙවීම් ගැන විය යුතුය
- පොලී අනුපාතික භාවිතා කරන්න (%)
- "රු." සංකේතය භාවිතා කරන්න
- ප්‍රායෝගික සන්දර්භයන් භාවිතා කරන්න (ගෘහ භාණ්ඩ, වාහන, ණය ආදිය)"""

[topic.difficulty.easy]
steps = "2-3"
description = "simple interest calculations"
numbers = "රු. 5,000 - රු. 50,000"
context = "මූලික පොලී ගණනය කිරීම්"

[topic.difficulty.medium]
steps = "3-4"
description = "installment and reducing balance calculations"
numbers = "රු. 50,000 - රු. 200,000"
context = "වාරික ගණනය සහ හීන වන ශේෂය"

[topic.difficulty.hard]
steps = "4-5"
description = "compound interest and complex scenarios"
numbers = "රු. 100,000 - රු. 500,000"
context = "වැල් පොලිය සහ සංකීර්ණ ගණනය කිරීම්"

[[topic]]
name = "සමීකරණ"
aliases = ["equations"]
prompt_template = """
ප්‍රශ්නයේ සන්දර්භය:
- දෛනික ජීවිතයේ ගැටළු සමීකරණ භාවිතයෙන් විසඳන්න
- විචල්‍යයන් x, y භාවිතා කරන්න
- පියවරෙන් පියවර විසඳුම පෙන්වන්න
- සෑම පියවරක්ම සිංහලෙන් පැහැදිලි කරන්න

අවසාන පිළිතුර:
- සරල සමීකරණ: x = 12 වැනි ආකාරයෙන්
- සමගාමී සමීකරණ: x = 20, y = 30 වැනි ආකාරයෙන්
- වර්ගජ සමීකරණ: x = 2 හෝ x = 3 වැනි ආකාරයෙන් (මූල දෙක)"""

[topic.difficulty.easy]
steps = "2-4"
description = "simple linear equations with one variable"
numbers = "1-50"
context = "සරල රේඛීය සමීකරණ"
sub_topics = ["සරල සමීකරණ"]
examples = [
    "භාග රහිත සරල සමීකරණ (2x + 8 = x + 12)",
    "සරල භාගමය සමීකරණ (x/2 + 1 = 3)",
    "එක් විචල්‍යයක් සහිත දෛනික ගැටළු",
]

[topic.difficulty.medium]
steps = "4-8"
description = "simultaneous equations and fractional equations"
numbers = "1-100 හෝ රු. 10,000 - රු. 100,000"
context = "සමගාමී සමීකරණ සහ භාගමය සංගුණක"
sub_topics = ["සමගාමී සමීකරණ විසඳීම", "භාගමය සංගුණක සහිත සමගාමී සමීකරණ"]
examples = [
    "දෙ විචල්‍යයන් සහිත සමගාමී සමීකරණ (6x + 2y = 1, 4x - y = 3)",
    "භාගමය සංගුණක සහිත සමීකරණ ((1/2)m + (2/3)n = 1)",
    "මුදල් බෙදාහැරීම් ගැටළු (කාසි, මුදල් ප්‍රමාණ)",
]

[topic.difficulty.hard]
steps = "6-15"
description = "quadratic equations and complex word problems"
numbers = "විචල්‍ය සංඛ්‍යා හෝ දශම අගයන්"
context = "වර්ගජ සමීකරණ සහ සංකීර්ණ ගැටළු"
sub_topics = [
    "සාධක භාවිතයෙන් වර්ගජ සමීකරණ විසඳීම",
    "වර්ග පූර්ණයෙන් වර්ගජ සමීකරණ විසදිම",
    "සූත්‍රය භාවිතයෙන් වර්ගජ සමීකරණ විසදීම",
]
examples = [
    "සාධකකරණය භාවිතයෙන් (x² - 5x + 6 = 0)",
    "සූත්‍රය භාවිතයෙන් (2x² + 7x + 3 = 0)",
    "පිතගෝරස් ප්‍රමේයය භාවිතා කරන ගැටළු",
]
formulas = ["x = (-b ± √(b² - 4ac)) / 2a", "පිතගෝරස් ප්‍රමේයය: a² + b² = c²"]

[[topic]]
name = "ශ්‍රීඝ්‍රතාවය"
aliases = ["speed"]
prompt_template = """
ප්‍රශ්නයේ සන්දර්භය:
- දුර, කාලය සහ ශ්‍රීඝ්‍රතාවය අතර සම්බන්ධය භාවිතා කරන්න
- නිවැරදි සූත්‍රය තෝරාගන්න
- ඒකක පරිවර්තනය අවශ්‍ය නම් සිදු කරන්න
- පියවරෙන් පියවර විසඳුම සිංහලෙන් පැහැදිලි කරන්න"""

[topic.difficulty.easy]
steps = "2-3"
description = "basic understanding of speed using simple values"
numbers = "1-100"
context = "ශ්‍රීඝ්‍රතාවයේ මූලික සංකල්ප"
sub_topics = ["ශ්‍රීඝ්‍රතාවය යනු කුමක්ද", "දුර, කාලය, ශ්‍රීඝ්‍රතාවය අතර සම්බන්ධය", "සරල ගණනය"]
examples = ["මෝටර් රථයක් පැය 2ක් තුළ km 60ක් ගමන් කරයි. ශ්‍රීඝ්‍රතාවය සොයන්න"]

[topic.difficulty.medium]
steps = "4-6"
description = "unit conversions and multi-step speed problems"
numbers = "1-500"
context = "ශ්‍රීඝ්‍රතාවය ගණනය සහ ඒකක පරිවර්තනය"
sub_topics = ["km/h ↔ m/s පරිවර්තනය", "දුර හෝ කාලය සොයාගැනීම", "බහු පියවර ගැටළු"]
examples = ["72 km/h m/s බවට පරිවර්තනය කරන්න", "ශ්‍රීඝ්‍රතාවය 60 km/h නම් පැය 3ක දුර සොයන්න"]

[topic.difficulty.hard]
steps = "6-10"
description = "complex word problems involving speed, time and distance"
numbers = "ආසන්න වශයෙන් 1-1000"
context = "ශ්‍රීඝ්‍රතාවය යෙදවුම් ගැටළු"
sub_topics = ["දෛනික ජීවිත ගැටළු", "විවිධ ඒකක සමඟ ගණනය", "O/L exam-style problems"]
examples = ["දුම්රියක් 90 km/h ශ්‍රීඝ්‍රතාවයෙන් පැය 2½ ගමන් කරයි. ගමන් කළ දුර සොයන්න"]
formulas = [
    "ශ්‍රීඝ්‍රතාවය = දුර / කාලය",
    "දුර = ශ්‍රීඝ්‍රතාවය × කාලය",
    "km/h → m/s = × 5/18",
]
"#;
