use sha2::{Digest, Sha256};

const LESSON_DIGEST_LEN: usize = 16;

/// Deterministic lesson identifier: the syllabus uid followed by a digest of
/// the module and lesson titles.
pub fn lesson_uid(syllabus_uid: &str, module_title: &str, lesson_title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(module_title.trim().as_bytes());
    hasher.update([0x1f]);
    hasher.update(lesson_title.trim().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", syllabus_uid, &digest[..LESSON_DIGEST_LEN])
}

/// Master and user documents live in separate key namespaces, so no user id
/// can alias the master key. Topic and level are case-folded.
pub fn syllabus_lock_key(topic: &str, level: &str, user_id: Option<&str>) -> String {
    let topic = topic.trim().to_lowercase();
    let level = level.to_lowercase();
    match user_id {
        Some(user_id) => format!("syllabus:{topic}:{level}#user:{user_id}"),
        None => format!("syllabus:{topic}:{level}#master"),
    }
}

pub fn lesson_lock_key(lesson_uid: &str) -> String {
    format!("lesson:{}", lesson_uid)
}

pub fn progress_lock_key(user_id: &str) -> String {
    format!("progress:{}", user_id)
}
