use std::fmt;

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::page::FrameId;
use chromiumoxide::Page;
use log::info;

use crate::config::Config;
use crate::models::{Course, CourseSummary};
use crate::utils::browser::{
    click_and_wait_for_navigation, frame_html, main_frame, navigate_frame, wait_for_frame,
    wait_for_selector, FrameQuery,
};
use crate::utils::parse::{parse_courses, parse_grade_items, GRADES_WRAPPER, STREAM_ITEM};

const COOKIE_BUTTON: &str = "#agree_button";
const USERNAME_FIELD: &str = "#user_id";
const PASSWORD_FIELD: &str = "#password";
const LOGIN_BUTTON: &str = "#entry-login";
const SUMMARY_FRAME: &str = "mybbCanvas";
const DETAIL_FRAME: &str = "right_stream_mygrades";

// The pipeline step a fatal error happened in; attached as the outermost error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LaunchBrowser,
    LoadLogin,
    Login,
    NavigateGrades,
    ParseCourses,
    ParseGrades,
    CloseBrowser,
    WriteOutput,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Stage::LaunchBrowser => "Error launching browser",
            Stage::LoadLogin => "Error loading login page",
            Stage::Login => "Error entering username and password",
            Stage::NavigateGrades => "Error navigating to grades",
            Stage::ParseCourses => "Error parsing courses",
            Stage::ParseGrades => "Error parsing grades",
            Stage::CloseBrowser => "Error closing browser",
            Stage::WriteOutput => "Error writing grades file",
        };
        f.write_str(message)
    }
}

// Runs every browser step in order and returns the fully populated courses.
pub async fn scrape(page: &Page, config: &Config) -> Result<Vec<Course>> {
    login(page, config).await?;
    let summary_frame = open_grades(page, config).await?;
    let summaries = scrape_courses(page, &summary_frame, config).await?;
    scrape_grades(page, &summary_frame, summaries, config).await
}

// Loads the login page, dismisses the cookie dialog if it shows up and signs in.
pub async fn login(page: &Page, config: &Config) -> Result<()> {
    info!("Loading login page.");
    page.goto(config.base_url.as_str())
        .await
        .context(Stage::LoadLogin)?;

    info!("Accepting cookies.");
    if let Err(e) = accept_cookies(page, config).await {
        info!("Agree to cookies element didn't appear ({e:#}).");
    }

    info!("Entering username and password.");
    submit_credentials(page, config)
        .await
        .context(Stage::Login)
}

async fn accept_cookies(page: &Page, config: &Config) -> Result<()> {
    let frame = main_frame(page).await?;
    wait_for_selector(page, &frame, COOKIE_BUTTON, config.timeouts.cookie_dialog).await?;
    page.find_element(COOKIE_BUTTON).await?.click().await?;
    Ok(())
}

async fn submit_credentials(page: &Page, config: &Config) -> Result<()> {
    let credentials = &config.credentials;
    page.find_element(USERNAME_FIELD)
        .await?
        .click()
        .await?
        .type_str(&credentials.username)
        .await?;
    page.find_element(PASSWORD_FIELD)
        .await?
        .click()
        .await?
        .type_str(&credentials.password)
        .await?;

    click_and_wait_for_navigation(page, LOGIN_BUTTON, config.timeouts.login_navigation)
        .await
        .context("login did not navigate")
}

// Opens the grades overview and resolves the frame that hosts the summary widget.
pub async fn open_grades(page: &Page, config: &Config) -> Result<FrameId> {
    info!("Navigating to grades.");
    page.goto(config.grades_url.as_str())
        .await
        .context(Stage::NavigateGrades)?;

    wait_for_frame(
        page,
        FrameQuery::named(SUMMARY_FRAME),
        config.timeouts.frame_discovery,
    )
    .await
    .context(Stage::NavigateGrades)
}

pub async fn scrape_courses(
    page: &Page,
    summary_frame: &FrameId,
    config: &Config,
) -> Result<Vec<CourseSummary>> {
    info!("Parsing courses.");
    read_courses(page, summary_frame, config)
        .await
        .context(Stage::ParseCourses)
}

async fn read_courses(
    page: &Page,
    summary_frame: &FrameId,
    config: &Config,
) -> Result<Vec<CourseSummary>> {
    wait_for_selector(page, summary_frame, STREAM_ITEM, config.timeouts.course_list).await?;
    let html = frame_html(page, summary_frame).await?;
    let courses = parse_courses(&html)?;
    info!("Found {} courses.", courses.len());
    Ok(courses)
}

// Visits each course's detail page, one at a time, in summary order.
pub async fn scrape_grades(
    page: &Page,
    summary_frame: &FrameId,
    summaries: Vec<CourseSummary>,
    config: &Config,
) -> Result<Vec<Course>> {
    info!("Parsing grades.");
    read_grades(page, summary_frame, summaries, config)
        .await
        .context(Stage::ParseGrades)
}

async fn read_grades(
    page: &Page,
    summary_frame: &FrameId,
    summaries: Vec<CourseSummary>,
    config: &Config,
) -> Result<Vec<Course>> {
    let detail_frame = wait_for_frame(
        page,
        FrameQuery::child_of(DETAIL_FRAME, summary_frame),
        config.timeouts.frame_discovery,
    )
    .await?;

    let mut courses = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let url = config.detail_url(&summary.grade_url)?;
        navigate_frame(
            page,
            &detail_frame,
            url.as_str(),
            config.timeouts.frame_navigation,
        )
        .await?;
        wait_for_selector(
            page,
            &detail_frame,
            GRADES_WRAPPER,
            config.timeouts.grades_wrapper,
        )
        .await?;

        info!("Parsing grades for \"{}\".", summary.course_name);
        let html = frame_html(page, &detail_frame).await?;
        let items = parse_grade_items(&html)
            .with_context(|| format!("failed to read grades of \"{}\"", summary.course_name))?;
        courses.push(summary.into_course(items));
    }
    Ok(courses)
}
