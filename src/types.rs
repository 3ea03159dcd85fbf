use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum KnowledgeLevel {
    #[default]
    #[serde(rename = "beginner")]
    Beginner,
    #[serde(rename = "early learner")]
    EarlyLearner,
    #[serde(rename = "good knowledge")]
    GoodKnowledge,
    #[serde(rename = "advanced")]
    Advanced,
}

impl KnowledgeLevel {
    pub const ALL: [KnowledgeLevel; 4] = [
        Self::Beginner,
        Self::EarlyLearner,
        Self::GoodKnowledge,
        Self::Advanced,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::EarlyLearner => "early learner",
            Self::GoodKnowledge => "good knowledge",
            Self::Advanced => "advanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace(['_', '-'], " ");
        Self::ALL.into_iter().find(|level| level.as_str() == normalized)
    }

    /// Unrecognised input falls back to `Beginner`.
    pub fn coerce(s: Option<&str>) -> Self {
        s.and_then(Self::parse).unwrap_or_default()
    }

    pub fn from_percentage(pct: f64) -> Self {
        if pct >= 85.0 {
            Self::Advanced
        } else if pct >= 65.0 {
            Self::GoodKnowledge
        } else if pct >= 35.0 {
            Self::EarlyLearner
        } else {
            Self::Beginner
        }
    }
}

impl std::fmt::Display for KnowledgeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            Self::Easy => 1.0,
            Self::Medium => 2.0,
            Self::Hard => 3.0,
        }
    }

    pub fn harder(&self) -> Self {
        match self {
            Self::Easy => Self::Medium,
            _ => Self::Hard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonRef {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyllabusModule {
    #[serde(default)]
    pub week: u32,
    pub title: String,
    #[serde(default)]
    pub lessons: Vec<LessonRef>,
}

impl SyllabusModule {
    pub fn find_lesson(&self, title: &str) -> Option<&LessonRef> {
        self.lessons.iter().find(|l| l.title == title)
    }
}

/// A generated syllabus, either the master for a (topic, level) pair or a
/// per-user derivative linked to it through `parent_uid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Syllabus {
    pub uid: String,
    pub topic: String,
    #[serde(default)]
    pub user_entered_topic: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default)]
    pub modules: Vec<SyllabusModule>,
    #[serde(default)]
    pub is_master: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub parent_uid: Option<String>,
    #[serde(default)]
    pub is_placeholder: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Syllabus {
    pub fn total_lessons(&self) -> usize {
        self.modules.iter().map(|m| m.lessons.len()).sum()
    }

    pub fn find_module(&self, title: &str) -> Option<&SyllabusModule> {
        self.modules.iter().find(|m| m.title == title)
    }

    pub fn contains_lesson(&self, title: &str) -> bool {
        self.modules.iter().any(|m| m.find_lesson(title).is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonMetadata {
    pub syllabus_uid: String,
    pub topic: String,
    pub level: String,
    pub module_title: String,
    pub lesson_title: String,
    #[serde(default)]
    pub personalized_for: Option<String>,
    #[serde(default)]
    pub is_placeholder: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonBody {
    pub exposition: String,
    pub thought_questions: Vec<String>,
    pub active_exercises: Vec<String>,
    pub knowledge_assessment: Vec<serde_json::Value>,
    pub metadata: LessonMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonContent {
    pub lesson_uid: String,
    pub content: LessonBody,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEntry {
    pub score: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TopicProgress {
    pub completed_lessons: Vec<String>,
    pub current_lesson: Option<String>,
    pub performance: BTreeMap<String, PerformanceEntry>,
    pub overall_progress: f64,
    pub overall_performance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: String,
    #[serde(default)]
    pub topics: BTreeMap<String, TopicProgress>,
    pub updated_at: DateTime<Utc>,
}

impl UserProgress {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            topics: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}
