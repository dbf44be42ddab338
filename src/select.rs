use chrono::{DateTime, Utc};
use std::io;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{PodRow, PodTarget};

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no pods found")]
    NoPods,
    #[error("pod `{pod}` has several containers ({containers}); pass -c to pick one when prompting is disabled")]
    AmbiguousContainer { pod: String, containers: String },
    #[error("pod `{pod}` lists no containers")]
    NoContainers { pod: String },
    #[error("selection cancelled")]
    Cancelled,
    #[error("cannot prompt for {0}: stdin is not a terminal")]
    NotInteractive(String),
    #[error("terminal prompt failed")]
    Terminal(#[from] io::Error),
}

/// Asks a human to pick one of `choices`, returning its index.
pub trait Prompter {
    fn select(&self, label: &str, header: &str, choices: &[String])
    -> Result<usize, SelectionError>;
}

/// Header plus data rows of the custom-column pod listing.
#[derive(Debug, Clone, Default)]
pub struct PodListing {
    pub header: String,
    pub rows: Vec<PodRow>,
}

pub fn parse_listing(text: &str) -> Result<PodListing, SelectionError> {
    let mut lines = text
        .lines()
        .map(|line| line.trim_matches(|c: char| c == ',' || c.is_whitespace()))
        .filter(|line| !line.is_empty());

    let Some(header) = lines.next() else {
        return Err(SelectionError::NoPods);
    };

    let rows = lines
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?.to_string();
            let status = fields.next()?.to_string();
            let created = fields.next()?.to_string();
            let containers = fields
                .next()
                .map(|value| {
                    value
                        .split(',')
                        .filter(|container| !container.is_empty() && *container != "<none>")
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            Some(PodRow {
                name,
                status,
                created,
                containers,
                extra: fields.map(str::to_string).collect(),
                line: line.to_string(),
            })
        })
        .collect::<Vec<_>>();

    if rows.is_empty() {
        return Err(SelectionError::NoPods);
    }

    Ok(PodListing {
        header: header.to_string(),
        rows,
    })
}

pub fn select_pod_and_container(
    listing: &str,
    no_prompt: bool,
    preselected_container: Option<&str>,
    prompter: &dyn Prompter,
) -> Result<PodTarget, SelectionError> {
    let mut listing = parse_listing(listing)?;
    listing
        .rows
        .sort_by(|left, right| right.created.cmp(&left.created));

    let now = Utc::now();
    let pod = if listing.rows.len() == 1 {
        listing.rows.swap_remove(0)
    } else if no_prompt {
        let count = listing.rows.len();
        let pod = listing.rows.swap_remove(0);
        warn!(
            "selecting the most recently created pod (of {count}) `{}` due to --no-prompt",
            pod.name
        );
        pod
    } else {
        let header = format!("{}  AGE", listing.header);
        let choices = listing
            .rows
            .iter()
            .map(|row| format!("{}  {}", row.line, pod_age(&row.created, now)))
            .collect::<Vec<_>>();
        let index = prompter.select("Select a pod", &header, &choices)?;
        if index >= listing.rows.len() {
            return Err(SelectionError::Cancelled);
        }
        listing.rows.swap_remove(index)
    };
    debug!(pod = %pod.name, status = %pod.status, labels = ?pod.extra, "selected pod");

    let container = match (preselected_container, pod.containers.as_slice()) {
        (Some(container), _) => container.to_string(),
        (None, []) => return Err(SelectionError::NoContainers { pod: pod.name }),
        (None, [only]) => only.clone(),
        (None, many) if no_prompt => {
            return Err(SelectionError::AmbiguousContainer {
                containers: many.join(", "),
                pod: pod.name,
            });
        }
        (None, many) => {
            let index = prompter.select("Select a container", "CONTAINER", many)?;
            many.get(index).cloned().ok_or(SelectionError::Cancelled)?
        }
    };

    Ok(PodTarget {
        pod: pod.name,
        container,
    })
}

fn pod_age(created: &str, now: DateTime<Utc>) -> String {
    let Ok(created) = DateTime::parse_from_rfc3339(created) else {
        return "-".to_string();
    };
    let elapsed = (now - created.with_timezone(&Utc)).num_seconds().max(0);
    format_elapsed_seconds(elapsed)
}

fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}

/// Answers prompts from a fixed script and records what was asked.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: std::cell::RefCell<std::collections::VecDeque<usize>>,
    pub asked: std::cell::RefCell<Vec<(String, Vec<String>)>>,
}

#[cfg(test)]
impl ScriptedPrompter {
    pub fn answering(answers: impl IntoIterator<Item = usize>) -> Self {
        Self {
            answers: std::cell::RefCell::new(answers.into_iter().collect()),
            asked: std::cell::RefCell::default(),
        }
    }

    pub fn prompts(&self) -> usize {
        self.asked.borrow().len()
    }
}

#[cfg(test)]
impl Prompter for ScriptedPrompter {
    fn select(
        &self,
        label: &str,
        _header: &str,
        choices: &[String],
    ) -> Result<usize, SelectionError> {
        self.asked
            .borrow_mut()
            .push((label.to_string(), choices.to_vec()));
        self.answers
            .borrow_mut()
            .pop_front()
            .ok_or(SelectionError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ScriptedPrompter, SelectionError, format_elapsed_seconds, parse_listing,
        select_pod_and_container,
    };

    const LISTING: &str = "\
NAME      STATUS    CREATED                CONTAINERS
web-a     Running   2024-03-01T10:00:00Z   web
web-c     Running   2024-03-03T10:00:00Z   web
web-b     Pending   2024-03-02T10:00:00Z   web
";

    #[test]
    fn header_only_listing_has_no_pods() {
        let error = parse_listing("NAME STATUS CREATED CONTAINERS\n").expect_err("no rows");
        assert!(matches!(error, SelectionError::NoPods));
        assert!(matches!(parse_listing(""), Err(SelectionError::NoPods)));
    }

    #[test]
    fn rows_split_containers_and_extra_columns() {
        let listing = parse_listing(
            "NAME STATUS CREATED CONTAINERS TEAM\napi-1 Running 2024-03-01T10:00:00Z api,sidecar payments\n",
        )
        .expect("one row");
        let row = &listing.rows[0];
        assert_eq!(row.containers, vec!["api".to_string(), "sidecar".to_string()]);
        assert_eq!(row.extra, vec!["payments".to_string()]);
    }

    #[test]
    fn no_prompt_picks_most_recent_pod() {
        let prompter = ScriptedPrompter::default();
        let target = select_pod_and_container(LISTING, true, None, &prompter).expect("select");
        assert_eq!(target.pod, "web-c");
        assert_eq!(target.container, "web");
        assert_eq!(prompter.prompts(), 0);
    }

    #[test]
    fn prompt_lists_pods_newest_first() {
        let prompter = ScriptedPrompter::answering([2]);
        let target = select_pod_and_container(LISTING, false, None, &prompter).expect("select");
        assert_eq!(target.pod, "web-a");

        let asked = prompter.asked.borrow();
        assert_eq!(asked.len(), 1, "single container must not prompt");
        assert!(asked[0].1[0].starts_with("web-c"));
    }

    #[test]
    fn several_containers_without_prompt_is_ambiguous() {
        let listing = "NAME STATUS CREATED CONTAINERS\napi-1 Running 2024-03-01T10:00:00Z api,sidecar\n";
        let prompter = ScriptedPrompter::default();
        let error = select_pod_and_container(listing, true, None, &prompter).expect_err("ambiguous");
        assert!(matches!(error, SelectionError::AmbiguousContainer { .. }));

        let target =
            select_pod_and_container(listing, true, Some("sidecar"), &prompter).expect("preselected");
        assert_eq!(target.container, "sidecar");
    }

    #[test]
    fn several_containers_prompt_for_a_choice() {
        let listing = "NAME STATUS CREATED CONTAINERS\napi-1 Running 2024-03-01T10:00:00Z api,sidecar\n";
        let prompter = ScriptedPrompter::answering([1]);
        let target = select_pod_and_container(listing, false, None, &prompter).expect("select");
        assert_eq!(target.container, "sidecar");
        assert_eq!(prompter.asked.borrow()[0].0, "Select a container");
    }

    #[test]
    fn elapsed_seconds_use_largest_unit() {
        assert_eq!(format_elapsed_seconds(42), "42s");
        assert_eq!(format_elapsed_seconds(125), "2m");
        assert_eq!(format_elapsed_seconds(7_300), "2h");
        assert_eq!(format_elapsed_seconds(200_000), "2d");
    }
}
