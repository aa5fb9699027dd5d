use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::{
    CourseSummary, GradeItem, NOT_SUBMITTED, NO_DUE_DATE, NO_STATUS, NO_TIMESTAMP, NO_TOTAL,
    NO_TYPE,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("every {parent} should have a {child} element ({selector})")]
    MissingElement {
        parent: &'static str,
        child: &'static str,
        selector: &'static str,
    },
    #[error("every {parent} should carry a {attribute} attribute")]
    MissingAttribute {
        parent: &'static str,
        attribute: &'static str,
    },
}

// Compiles a constant CSS selector once and hands out a static reference to it.
macro_rules! selector {
    ($css:literal) => {{
        static CELL: OnceLock<Selector> = OnceLock::new();
        CELL.get_or_init(|| Selector::parse($css).expect("static selector should be valid"))
    }};
}

pub const STREAM_ITEM: &str = ".stream_item";
pub const GRADES_WRAPPER: &str = "#grades_wrapper";
const DETAIL_URL_ATTRIBUTE: &str = "bb:rhs";

// One row of the field decision table: where an optional field lives in a grade row,
// and what it becomes when that element is missing or blank.
#[derive(Debug)]
pub struct FieldRule {
    pub selector: &'static str,
    pub sentinel: &'static str,
    compiled: OnceLock<Selector>,
}

impl FieldRule {
    pub const fn new(selector: &'static str, sentinel: &'static str) -> Self {
        Self {
            selector,
            sentinel,
            compiled: OnceLock::new(),
        }
    }

    fn compiled(&self) -> &Selector {
        self.compiled
            .get_or_init(|| match Selector::parse(self.selector) {
                Ok(sel) => sel,
                Err(e) => panic!("Error parsing field selector {}: {:?}", self.selector, e),
            })
    }

    // Text of the first matching element, if there is one and it is not blank.
    pub fn lookup(&self, row: ElementRef<'_>) -> Option<String> {
        row.select(self.compiled())
            .next()
            .map(inner_text)
            .filter(|text| !text.is_empty())
    }

    pub fn extract(&self, row: ElementRef<'_>) -> String {
        self.lookup(row)
            .unwrap_or_else(|| self.sentinel.to_string())
    }
}

pub static DUE: FieldRule = FieldRule::new(".gradable > .activityType", NO_DUE_DATE);
pub static TYPE: FieldRule = FieldRule::new(".itemCat", NO_TYPE);
pub static SUBMITTED: FieldRule = FieldRule::new(".lastActivityDate", NOT_SUBMITTED);
pub static STATUS: FieldRule = FieldRule::new(".timestamp > .activityType", NO_STATUS);
pub static TOTAL: FieldRule = FieldRule::new(".pointsPossible", NO_TOTAL);

// Collapses whitespace runs the way a rendered innerText reads.
pub fn remove_excess_whitespace(s: &str) -> Cow<'_, str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\s+").expect("regex should be valid"));
    re.replace_all(s, " ")
}

// Elements that start a new rendered line, the way innerText breaks them.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

fn push_rendered(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(&remove_excess_whitespace(text));
        } else if let Some(child) = ElementRef::wrap(child) {
            let name = child.value().name();
            if matches!(name, "script" | "style" | "template") {
                continue;
            }
            let block = BLOCK_ELEMENTS.contains(&name);
            if block {
                out.push('\n');
            }
            push_rendered(child, out);
            if block {
                out.push('\n');
            }
        }
    }
}

// Non-blank rendered lines of an element, each with its whitespace collapsed.
pub fn rendered_lines(element: ElementRef<'_>) -> Vec<String> {
    let mut rendered = String::new();
    push_rendered(element, &mut rendered);
    rendered
        .split('\n')
        .map(|line| remove_excess_whitespace(line).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

pub fn inner_text(element: ElementRef<'_>) -> String {
    rendered_lines(element).join(" ")
}

fn first_line(element: ElementRef<'_>) -> String {
    rendered_lines(element)
        .into_iter()
        .next()
        .unwrap_or_default()
}

fn required<'a>(
    parent: ElementRef<'a>,
    selector: &Selector,
    parent_label: &'static str,
    child_label: &'static str,
    css: &'static str,
) -> Result<ElementRef<'a>, Error> {
    parent.select(selector).next().ok_or(Error::MissingElement {
        parent: parent_label,
        child: child_label,
        selector: css,
    })
}

// Parses every stream item of the grade summary widget, in document order.
pub fn parse_courses(html: &str) -> Result<Vec<CourseSummary>, Error> {
    let document = Html::parse_document(html);
    let mut courses = Vec::new();

    for item in document.select(selector!(".stream_item")) {
        let name = required(
            item,
            selector!(".stream_area_name"),
            "stream item",
            "course name",
            ".stream_area_name",
        )?;
        let grade = required(
            item,
            selector!(".grade-value"),
            "stream item",
            "grade value",
            ".grade-value",
        )?;
        let last_updated = item
            .select(selector!(".stream_datestamp"))
            .next()
            .map(inner_text)
            .filter(|stamp| !stamp.is_empty())
            .unwrap_or_else(|| NO_TIMESTAMP.to_string());
        let grade_url = item
            .value()
            .attr(DETAIL_URL_ATTRIBUTE)
            .ok_or(Error::MissingAttribute {
                parent: "stream item",
                attribute: DETAIL_URL_ATTRIBUTE,
            })?;

        courses.push(CourseSummary {
            course_name: inner_text(name),
            grade_value: inner_text(grade),
            last_updated,
            grade_url: grade_url.trim().to_string(),
        });
    }

    Ok(courses)
}

// Parses the graded item rows of a course detail page, skipping calculated rows.
pub fn parse_grade_items(html: &str) -> Result<Vec<GradeItem>, Error> {
    let document = Html::parse_document(html);
    document
        .select(selector!(".sortable_item_row:not(.calculatedRow)"))
        .map(parse_grade_row)
        .collect()
}

pub fn parse_grade_row(row: ElementRef<'_>) -> Result<GradeItem, Error> {
    let title_cell = required(
        row,
        selector!(".cell.gradable"),
        "grade row",
        "title cell",
        ".cell.gradable",
    )?;

    // Pass/fail items carry a status indicator instead of points.
    let pass_fail = row.select(selector!(".gradeStatus > span > span")).next();
    let score = match pass_fail {
        Some(indicator) => inner_text(indicator),
        None => inner_text(required(
            row,
            selector!(".grade > .grade"),
            "grade row",
            "score",
            ".grade > .grade",
        )?),
    };
    let total = match pass_fail {
        Some(_) => NO_TOTAL.to_string(),
        None => TOTAL
            .lookup(row)
            .map(|total| total.replacen('/', "", 1).trim().to_string())
            .filter(|total| !total.is_empty())
            .unwrap_or_else(|| TOTAL.sentinel.to_string()),
    };

    Ok(GradeItem {
        title: first_line(title_cell),
        due: DUE.extract(row),
        kind: TYPE.extract(row),
        submitted: SUBMITTED.extract(row),
        status: STATUS.extract(row),
        score,
        total,
    })
}
