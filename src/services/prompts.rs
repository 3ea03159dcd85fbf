use crate::types::{Difficulty, KnowledgeLevel, Syllabus, TopicProgress};

pub const QUESTION_KEYS: &[&str] = &["question"];
pub const EVALUATION_KEYS: &[&str] = &["evaluation", "feedback"];
pub const SYLLABUS_KEYS: &[&str] = &["topic", "level", "duration", "learning_objectives", "modules"];
pub const LESSON_KEYS: &[&str] = &[
    "exposition",
    "thought_questions",
    "active_exercises",
    "knowledge_assessment",
];

pub fn question_prompt(
    topic: &str,
    knowledge_level: KnowledgeLevel,
    difficulty: Difficulty,
    previous_questions: &[String],
) -> String {
    let asked = if previous_questions.is_empty() {
        "None yet.".to_string()
    } else {
        previous_questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}. {}", i + 1, q))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are assessing a learner's knowledge of "{topic}".
The learner describes their level as "{level}".

Write ONE new {difficulty} question about {topic}.
- It must test understanding, not trivia.
- It must NOT repeat or paraphrase any question already asked.

Questions already asked:
{asked}

Return ONLY a JSON object:
{{"question": "..."}}"#,
        level = knowledge_level.as_str(),
        difficulty = difficulty.as_str(),
    )
}

pub fn evaluation_prompt(topic: &str, question: &str, answer: &str) -> String {
    format!(
        r#"You are grading an answer in an assessment about "{topic}".

Question: {question}
Learner's answer: {answer}

Grade the answer as exactly one of:
- 1 (correct)
- 0.5 (partially correct)
- 0 (incorrect or no meaningful answer)

Return ONLY a JSON object:
{{"evaluation": 1, "feedback": "one or two sentences explaining the grade"}}"#
    )
}

pub fn syllabus_prompt(
    topic: &str,
    level: &str,
    search_context: &[String],
    previous: Option<&Syllabus>,
    feedback: Option<&str>,
) -> String {
    let context = search_context
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");

    let revision = match (previous, feedback) {
        (Some(prev), Some(fb)) => format!(
            "\nRevise the following syllabus according to the learner's feedback.\nCurrent syllabus:\n{}\nFeedback: {fb}\n",
            serde_json::to_string_pretty(&SyllabusOutline::from(prev)).unwrap_or_default()
        ),
        _ => String::new(),
    };

    format!(
        r#"Design a structured syllabus for learning "{topic}" at the "{level}" level.

Reference material:
{context}
{revision}
Return ONLY a JSON object with this exact structure:
{{
  "topic": "concise topic title",
  "level": "{level}",
  "duration": "e.g. 4 weeks",
  "learning_objectives": ["..."],
  "modules": [
    {{"week": 1, "title": "...", "lessons": [{{"title": "..."}}]}}
  ]
}}"#
    )
}

pub fn lesson_prompt(
    syllabus: &Syllabus,
    module_title: &str,
    lesson_title: &str,
    prior: Option<&TopicProgress>,
) -> String {
    let objectives = syllabus
        .learning_objectives
        .iter()
        .map(|o| format!("- {o}"))
        .collect::<Vec<_>>()
        .join("\n");

    let personalization = prior
        .filter(|p| !p.performance.is_empty())
        .map(|p| {
            let scores = p
                .performance
                .iter()
                .map(|(lesson, entry)| format!("- {lesson}: {:.0}%", entry.score * 100.0))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "\nThe learner's results on earlier lessons (overall {:.0}%):\n{scores}\nAdjust depth and pacing accordingly; revisit weak areas briefly.\n",
                p.overall_performance * 100.0
            )
        })
        .unwrap_or_default();

    format!(
        r#"Write the lesson "{lesson_title}" from the module "{module_title}" of a "{topic}" course for a "{level}" learner.

Course objectives:
{objectives}
{personalization}
Return ONLY a JSON object:
{{
  "exposition": "the main teaching text (markdown allowed)",
  "thought_questions": ["open reflective questions"],
  "active_exercises": ["hands-on exercises"],
  "knowledge_assessment": [
    {{"question": "...", "options": ["..."], "answer": "...", "explanation": "..."}}
  ]
}}"#,
        topic = syllabus.topic,
        level = syllabus.level,
    )
}

#[derive(serde::Serialize)]
struct SyllabusOutline<'a> {
    topic: &'a str,
    level: &'a str,
    duration: &'a str,
    learning_objectives: &'a [String],
    modules: &'a [crate::types::SyllabusModule],
}

impl<'a> From<&'a Syllabus> for SyllabusOutline<'a> {
    fn from(s: &'a Syllabus) -> Self {
        Self {
            topic: &s.topic,
            level: &s.level,
            duration: &s.duration,
            learning_objectives: &s.learning_objectives,
            modules: &s.modules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_prompt_lists_previous_questions() {
        let prompt = question_prompt(
            "Rust",
            KnowledgeLevel::Beginner,
            Difficulty::Medium,
            &["What is a borrow?".to_string()],
        );
        assert!(prompt.contains("1. What is a borrow?"));
        assert!(prompt.contains("medium question"));
    }

    #[test]
    fn evaluation_prompt_carries_answer() {
        let prompt = evaluation_prompt("Rust", "Q?", "my answer");
        assert!(prompt.contains("my answer"));
        assert!(prompt.contains("\"evaluation\""));
    }
}
