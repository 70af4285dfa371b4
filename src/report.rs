use std::fmt::Write;

use crate::models::{RewardBalance, UserId};

/// Share of the user's overall credit earned in one topic, in percent.
pub fn share_of_total(balance: &RewardBalance, user_total: i64) -> f64 {
    if user_total <= 0 {
        0.0
    } else {
        balance.total_credit as f64 * 100.0 / user_total as f64
    }
}

pub fn build_report(user_id: UserId, balances: &[RewardBalance], user_total: i64) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Reward Credit Report");
    let _ = writeln!(output, "Generated for user {} ({} credit overall)", user_id, user_total);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Credit by Topic");

    if balances.is_empty() {
        let _ = writeln!(output, "No credit recorded for this user.");
    } else {
        for balance in balances {
            let _ = writeln!(
                output,
                "- topic {}: {} total ({} reading, {} completion), {:.1}% of overall",
                balance.topic_id,
                balance.total_credit,
                balance.reading_credit,
                balance.completion_credit,
                share_of_total(balance, user_total)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Completed Items");

    let completed: Vec<&RewardBalance> = balances
        .iter()
        .filter(|balance| balance.items_completed > 0)
        .collect();
    if completed.is_empty() {
        let _ = writeln!(output, "No completed items yet.");
    } else {
        for balance in completed {
            let _ = writeln!(
                output,
                "- topic {}: {} items, last updated {}",
                balance.topic_id,
                balance.items_completed,
                balance.updated_at.format("%Y-%m-%d")
            );
        }
    }

    output
}
