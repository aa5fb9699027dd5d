use serde::{Deserialize, Serialize};

pub const NO_DUE_DATE: &str = "No Due Date";
pub const NO_TYPE: &str = "No Type";
pub const NOT_SUBMITTED: &str = "Not Submitted";
pub const NO_STATUS: &str = "No Status";
pub const NO_TOTAL: &str = "No Total";
pub const NO_TIMESTAMP: &str = "-";

// One course as listed in the grade summary widget, before its detail page is scraped.
// The grade URL only lives here; it never reaches the output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseSummary {
    pub course_name: String,
    pub grade_value: String,
    pub last_updated: String,
    pub grade_url: String,
}

impl CourseSummary {
    // Consumes the summary once its items are known, dropping the grade URL.
    pub fn into_course(self, items: Vec<GradeItem>) -> Course {
        Course {
            course_name: self.course_name,
            grade_value: self.grade_value,
            last_updated: self.last_updated,
            items,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub course_name: String,
    pub grade_value: String,
    pub last_updated: String,
    pub items: Vec<GradeItem>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GradeItem {
    pub title: String,
    pub due: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub submitted: String,
    pub status: String,
    pub score: String,
    pub total: String,
}
