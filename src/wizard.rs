use crate::error::{ApiError, Result};
use crate::models::{CreateEmailJob, GeneratedTemplate};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};

pub const DEFAULT_THROTTLE: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    SelectData,
    EmailAccount,
    Compose,
    Schedule,
    Review,
}

impl Step {
    pub const ALL: [Step; 5] = [
        Step::SelectData,
        Step::EmailAccount,
        Step::Compose,
        Step::Schedule,
        Step::Review,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Step::SelectData => "Select Data",
            Step::EmailAccount => "Email Account",
            Step::Compose => "Compose",
            Step::Schedule => "Schedule",
            Step::Review => "Review",
        }
    }
}

/// Linear stepper over `[0, count - 1]`. Moves clamp at both ends.
#[derive(Debug, Clone)]
pub struct StepSequencer {
    current: usize,
    count: usize,
}

impl StepSequencer {
    pub fn new(count: usize) -> Self {
        Self {
            current: 0,
            count: count.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn last(&self) -> usize {
        self.count - 1
    }

    pub fn is_last(&self) -> bool {
        self.current == self.last()
    }

    pub fn next(&mut self) -> usize {
        self.current = (self.current + 1).min(self.last());
        self.current
    }

    pub fn prev(&mut self) -> usize {
        self.current = self.current.saturating_sub(1);
        self.current
    }
}

impl Default for StepSequencer {
    fn default() -> Self {
        Self::new(Step::ALL.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleType {
    #[default]
    Now,
    Scheduled,
}

/// Everything the user has entered so far. Lives only as long as the
/// wizard screen.
#[derive(Debug, Clone)]
pub struct WizardDraft {
    pub campaign_name: String,
    pub dataset_id: Option<i64>,
    pub email_account_id: Option<i64>,
    pub subject_template: String,
    pub body_template: String,
    pub prompt: String,
    pub schedule_type: ScheduleType,
    pub scheduled_date: String,
    pub scheduled_time: String,
    pub throttle_enabled: bool,
    pub throttle_rate: u32,
}

impl Default for WizardDraft {
    fn default() -> Self {
        Self {
            campaign_name: String::new(),
            dataset_id: None,
            email_account_id: None,
            subject_template: String::new(),
            body_template: String::new(),
            prompt: String::new(),
            schedule_type: ScheduleType::Now,
            scheduled_date: String::new(),
            scheduled_time: String::new(),
            throttle_enabled: false,
            throttle_rate: DEFAULT_THROTTLE,
        }
    }
}

impl WizardDraft {
    /// Advancing out of `step` is blocked only on the first two steps.
    pub fn can_advance_from(&self, step: Step) -> bool {
        match step {
            Step::SelectData => self.dataset_id.is_some(),
            Step::EmailAccount => self.email_account_id.is_some(),
            _ => true,
        }
    }

    pub fn can_submit(&self) -> bool {
        self.dataset_id.is_some()
            && self.email_account_id.is_some()
            && !self.subject_template.is_empty()
            && !self.body_template.is_empty()
    }

    /// Overwrite subject and body with a generated template.
    pub fn apply_generated(&mut self, generated: GeneratedTemplate) {
        self.subject_template = generated.subject.unwrap_or_default();
        self.body_template = generated.body.unwrap_or_default();
    }

    /// Numeric input for the throttle; anything unparsable or zero falls
    /// back to the default rate.
    pub fn set_throttle_input(&mut self, input: &str) {
        self.throttle_rate = input
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|r| *r > 0)
            .unwrap_or(DEFAULT_THROTTLE);
    }

    pub fn throttle_per_minute(&self) -> u32 {
        if self.throttle_enabled {
            self.throttle_rate
        } else {
            DEFAULT_THROTTLE
        }
    }

    /// `None` sends immediately. A scheduled draft missing its date or time
    /// also sends immediately; a present but malformed one is an error.
    pub fn scheduled_at(&self) -> Result<Option<String>> {
        let date = self.scheduled_date.trim();
        let time = self.scheduled_time.trim();
        match self.schedule_type {
            ScheduleType::Scheduled if !date.is_empty() && !time.is_empty() => {
                combine_schedule(date, time, &Local).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn to_payload(&self) -> Result<CreateEmailJob> {
        let (Some(dataset_id), Some(email_account_id)) = (self.dataset_id, self.email_account_id)
        else {
            return Err(ApiError::validation(
                "Select a dataset and an email account first",
            ));
        };
        if self.subject_template.is_empty() || self.body_template.is_empty() {
            return Err(ApiError::validation("Subject and body are required"));
        }

        Ok(CreateEmailJob {
            dataset_id,
            email_account_id,
            subject_template: self.subject_template.clone(),
            prompt_template: self.body_template.clone(),
            scheduled_at: self.scheduled_at()?,
            throttle_per_minute: self.throttle_per_minute(),
        })
    }
}

/// Combine a `YYYY-MM-DD` date and `HH:MM[:SS]` time, read in `tz`, into a
/// UTC ISO-8601 timestamp with millisecond precision.
pub fn combine_schedule<Tz: TimeZone>(date: &str, time: &str, tz: &Tz) -> Result<String> {
    let date = date.trim();
    let time = time.trim();
    if date.is_empty() || time.is_empty() {
        return Err(ApiError::validation(
            "Pick a date and time for scheduled sending",
        ));
    }

    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ApiError::validation("Invalid date, expected YYYY-MM-DD"))?;
    let time = NaiveTime::parse_from_str(time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .map_err(|_| ApiError::validation("Invalid time, expected HH:MM"))?;

    let local = tz
        .from_local_datetime(&NaiveDateTime::new(date, time))
        .earliest()
        .ok_or_else(|| ApiError::validation("Invalid time value"))?;

    Ok(local
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};

    fn ready_draft() -> WizardDraft {
        WizardDraft {
            dataset_id: Some(4),
            email_account_id: Some(9),
            subject_template: "Hello {{first_name}}".into(),
            body_template: "Body".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_next_and_prev_clamp() {
        for start in 0..Step::ALL.len() {
            let mut seq = StepSequencer::default();
            for _ in 0..start {
                seq.next();
            }
            assert_eq!(seq.current(), start);
            assert_eq!(seq.next(), (start + 1).min(seq.last()));
        }

        let mut seq = StepSequencer::default();
        assert_eq!(seq.prev(), 0);
        for _ in 0..10 {
            seq.next();
        }
        assert_eq!(seq.current(), 4);
        assert!(seq.is_last());
    }

    #[test]
    fn test_advance_gates() {
        let mut draft = WizardDraft::default();
        assert!(!draft.can_advance_from(Step::SelectData));
        draft.dataset_id = Some(1);
        assert!(draft.can_advance_from(Step::SelectData));

        assert!(!draft.can_advance_from(Step::EmailAccount));
        draft.email_account_id = Some(2);
        assert!(draft.can_advance_from(Step::EmailAccount));

        let empty = WizardDraft::default();
        assert!(empty.can_advance_from(Step::Compose));
        assert!(empty.can_advance_from(Step::Schedule));
    }

    #[test]
    fn test_generated_template_overwrites_fields() {
        let mut draft = ready_draft();
        draft.subject_template = "my old subject".into();
        draft.body_template = "my old body".into();
        draft.apply_generated(GeneratedTemplate {
            subject: Some("S".into()),
            body: Some("B".into()),
        });
        assert_eq!(draft.subject_template, "S");
        assert_eq!(draft.body_template, "B");

        draft.apply_generated(GeneratedTemplate {
            subject: Some("Only subject".into()),
            body: None,
        });
        assert_eq!(draft.body_template, "");
    }

    #[test]
    fn test_send_now_has_null_schedule_and_default_throttle() {
        let mut draft = ready_draft();
        draft.scheduled_date = "2026-10-20".into();
        draft.scheduled_time = "09:00".into();
        draft.throttle_rate = 10;

        let payload = draft.to_payload().unwrap();
        assert_eq!(payload.scheduled_at, None);
        assert_eq!(payload.throttle_per_minute, 60);
        assert_eq!(payload.prompt_template, "Body");
    }

    #[test]
    fn test_scheduled_combines_date_and_time() {
        let mut draft = ready_draft();
        draft.schedule_type = ScheduleType::Scheduled;
        draft.scheduled_date = "2026-10-20".into();
        draft.scheduled_time = "09:30".into();
        draft.throttle_enabled = true;
        draft.throttle_rate = 25;

        let payload = draft.to_payload().unwrap();
        let stamp = payload.scheduled_at.unwrap();
        assert!(stamp.ends_with('Z'));
        let parsed = DateTime::parse_from_rfc3339(&stamp).unwrap();
        let expected = Local
            .from_local_datetime(&NaiveDateTime::new(
                NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
                NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            ))
            .earliest()
            .unwrap();
        assert_eq!(parsed.with_timezone(&Utc), expected.with_timezone(&Utc));
        assert_eq!(payload.throttle_per_minute, 25);
    }

    #[test]
    fn test_combine_schedule_is_iso_utc() {
        assert_eq!(
            combine_schedule("2026-10-18", "09:30", &Utc).unwrap(),
            "2026-10-18T09:30:00.000Z"
        );
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            combine_schedule("2026-10-18", "09:30", &plus_two).unwrap(),
            "2026-10-18T07:30:00.000Z"
        );
    }

    #[test]
    fn test_scheduled_without_date_sends_now() {
        let mut draft = ready_draft();
        draft.schedule_type = ScheduleType::Scheduled;
        draft.scheduled_time = "09:30".into();
        assert_eq!(draft.to_payload().unwrap().scheduled_at, None);

        draft.scheduled_date = "2026-10-18".into();
        draft.scheduled_time = "  ".into();
        assert_eq!(draft.to_payload().unwrap().scheduled_at, None);
    }

    #[test]
    fn test_malformed_schedule_is_rejected() {
        let mut draft = ready_draft();
        draft.schedule_type = ScheduleType::Scheduled;
        draft.scheduled_date = "18/10/2026".into();
        draft.scheduled_time = "09:30".into();
        assert!(draft.to_payload().is_err());
        assert!(combine_schedule("2026-13-01", "09:30", &Utc).is_err());
        assert!(combine_schedule("2026-10-18", "9.30pm", &Utc).is_err());
    }

    #[test]
    fn test_submit_requires_subject_and_body() {
        let mut draft = ready_draft();
        assert!(draft.can_submit());
        draft.body_template.clear();
        assert!(!draft.can_submit());
        assert!(draft.to_payload().is_err());
    }

    #[test]
    fn test_throttle_input_falls_back_to_default() {
        let mut draft = WizardDraft::default();
        draft.set_throttle_input("120");
        assert_eq!(draft.throttle_rate, 120);
        draft.set_throttle_input("abc");
        assert_eq!(draft.throttle_rate, 60);
        draft.set_throttle_input("0");
        assert_eq!(draft.throttle_rate, 60);
    }
}
