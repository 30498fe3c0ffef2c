//! Mention extraction from Slack message text.

use regex::Regex;
use std::sync::LazyLock;

/// Slack's encoded user mention, e.g. `<@U024BE7LH>`.
static USER_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@([A-Z0-9]+)>").unwrap());

/// Return the distinct user ids mentioned in `text`, in first-occurrence order,
/// excluding `bot_user_id`.
///
/// Labelled mentions such as `<@U123|alice>` and lowercase ids do not match.
pub fn mentioned_users(text: &str, bot_user_id: &str) -> Vec<String> {
    let mut users: Vec<String> = Vec::new();
    for caps in USER_MENTION.captures_iter(text) {
        let id = &caps[1];
        if id == bot_user_id || users.iter().any(|u| u == id) {
            continue;
        }
        users.push(id.to_string());
    }
    users
}
