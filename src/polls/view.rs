//! Public View
//!
//! Presentation shape of a poll, rebuilt from engine state on every request.

use serde::{Deserialize, Serialize};

use super::types::{Poll, PollId, PollOption};

/// Option as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOptionObject {
    pub text: String,
    pub voter_count: i32,
    /// Share of all respondents, 0..=100
    pub vote_percentage: i32,
    pub is_chosen: bool,
}

/// Poll as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollObject {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOptionObject>,
    pub total_voter_count: i32,
    pub is_closed: bool,
}

impl PollObject {
    /// JSON form handed to presentation layers
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.get(),
            "question": self.question,
            "options": self.options,
            "total_voter_count": self.total_voter_count,
            "is_closed": self.is_closed,
        })
    }
}

fn get_poll_option_object(option: &PollOption, vote_percentage: i32) -> PollOptionObject {
    PollOptionObject {
        text: option.text.clone(),
        voter_count: option.voter_count,
        vote_percentage,
        is_chosen: option.is_chosen,
    }
}

/// Project a poll into its presentation shape
pub fn get_poll_object(poll_id: PollId, poll: &Poll) -> PollObject {
    let voter_counts: Vec<i32> = poll.options.iter().map(|o| o.voter_count).collect();
    let percentages = vote_percentages(&voter_counts, poll.total_voter_count);
    PollObject {
        id: poll_id,
        question: poll.question.clone(),
        options: poll
            .options
            .iter()
            .zip(percentages)
            .map(|(option, percentage)| get_poll_option_object(option, percentage))
            .collect(),
        total_voter_count: poll.total_voter_count,
        is_closed: poll.is_closed,
    }
}

/// Percentage of respondents per option.
///
/// When the option counts add up to the total (one choice per respondent)
/// the largest-remainder method is used so the percentages sum to exactly
/// 100. Otherwise each percentage is rounded on its own.
pub fn vote_percentages(voter_counts: &[i32], total_voter_count: i32) -> Vec<i32> {
    if total_voter_count <= 0 {
        return vec![0; voter_counts.len()];
    }
    let total = i64::from(total_voter_count);
    let counts: Vec<i64> = voter_counts
        .iter()
        .map(|&count| i64::from(count.max(0)).min(total))
        .collect();

    if counts.iter().sum::<i64>() != total {
        return counts
            .iter()
            .map(|&count| ((count * 200 + total) / (2 * total)) as i32)
            .collect();
    }

    let remainder = |index: usize| counts[index] * 100 % total;
    let mut percentages: Vec<i64> = counts.iter().map(|&count| count * 100 / total).collect();
    let mut leftover = 100 - percentages.iter().sum::<i64>();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| remainder(b).cmp(&remainder(a)).then(a.cmp(&b)));
    for index in order {
        if leftover == 0 {
            break;
        }
        if remainder(index) > 0 {
            percentages[index] += 1;
            leftover -= 1;
        }
    }

    percentages.into_iter().map(|p| p as i32).collect()
}
