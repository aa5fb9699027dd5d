use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use crate::models::Course;

// Renders the courses as JSON indented with four spaces.
pub fn to_pretty_json(courses: &[Course]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"    "));
    courses
        .serialize(&mut serializer)
        .context("Failed to serialize courses")?;
    Ok(buffer)
}

// Writes the whole file in one go, replacing whatever was there.
pub fn write_courses(path: &Path, courses: &[Course]) -> Result<()> {
    let json = to_pretty_json(courses)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GradeItem, NO_TOTAL};

    fn courses() -> Vec<Course> {
        vec![Course {
            course_name: "Algorithms I".to_string(),
            grade_value: "92%".to_string(),
            last_updated: "3/1".to_string(),
            items: vec![GradeItem {
                title: "Attendance".to_string(),
                due: "No Due Date".to_string(),
                kind: "No Type".to_string(),
                submitted: "Not Submitted".to_string(),
                status: "No Status".to_string(),
                score: "Complete".to_string(),
                total: NO_TOTAL.to_string(),
            }],
        }]
    }

    #[test]
    fn uses_four_space_indentation() {
        let json = String::from_utf8(to_pretty_json(&courses()).unwrap()).unwrap();
        assert!(json.starts_with("[\n    {\n        \"courseName\": \"Algorithms I\","));
        assert!(json.contains("\n        \"items\": [\n            {\n                \"title\": \"Attendance\","));
        assert!(!json.contains("gradeUrl"));
    }

    #[test]
    fn empty_list_is_an_empty_array() {
        assert_eq!(to_pretty_json(&[]).unwrap(), b"[]");
    }

    #[test]
    fn overwrites_and_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courses_data.json");
        fs::write(&path, "x".repeat(4096)).unwrap();

        write_courses(&path, &courses()).unwrap();
        let first = fs::read(&path).unwrap();
        write_courses(&path, &courses()).unwrap();
        let second = fs::read(&path).unwrap();

        assert_eq!(first, second);
        let parsed: Vec<Course> = serde_json::from_slice(&first).unwrap();
        assert_eq!(parsed, courses());
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("grades.json");
        write_courses(&path, &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
    }
}
