/// Output formatting: terminal table and JSON.
use hotsmash_core::{Entity, FlushReport, QueueStats, SubmitOutcome, VotingStats};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonRankedFounder<'a> {
    rank: usize,
    id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    company: Option<&'a str>,
    rating: i64,
    compare_count: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonStats<'a> {
    voting: &'a VotingStats,
    queue: &'a QueueStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_votes_today: Option<u64>,
}

pub fn print_pretty<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => crate::bail(format!("Failed to encode JSON output: {e}")),
    }
}

/// Print founder rankings as a formatted terminal table.
pub fn print_rankings_table(ranked: &[Entity]) {
    let name_width = ranked.iter().map(|e| e.name.len()).max().unwrap_or(4).max(4);
    let company_width = ranked
        .iter()
        .map(|e| e.company.as_deref().unwrap_or("").len())
        .max()
        .unwrap_or(7)
        .max(7);

    println!(" # | {:<name_width$} | {:<company_width$} | Rating | Votes", "Name", "Company");
    println!(
        "---|-{}-|-{}-|--------|------",
        "-".repeat(name_width),
        "-".repeat(company_width)
    );

    for (i, e) in ranked.iter().enumerate() {
        println!(
            "{:>2} | {:<name_width$} | {:<company_width$} | {:>6} | {:>5}",
            i + 1,
            e.name,
            e.company.as_deref().unwrap_or(""),
            e.rating,
            e.compare_count,
        );
    }

    let total: u64 = ranked.iter().map(|e| e.compare_count).sum();
    // Each vote counts once for each side.
    println!("\n{} founders, {} votes", ranked.len(), total / 2);
}

/// Print founder rankings as JSON.
pub fn print_rankings_json(ranked: &[Entity]) {
    let items: Vec<JsonRankedFounder> = ranked
        .iter()
        .enumerate()
        .map(|(i, e)| JsonRankedFounder {
            rank: i + 1,
            id: &e.id,
            name: &e.name,
            company: e.company.as_deref(),
            rating: e.rating,
            compare_count: e.compare_count,
        })
        .collect();
    print_pretty(&items);
}

pub fn print_pair(left: &Entity, right: &Entity, json: bool) {
    if json {
        print_pretty(&[left, right]);
        return;
    }
    for (side, e) in [("left", left), ("right", right)] {
        match e.company.as_deref() {
            Some(company) => println!("{side:>5}: {} ({company}) [{}] rating {}", e.name, e.id, e.rating),
            None => println!("{side:>5}: {} [{}] rating {}", e.name, e.id, e.rating),
        }
    }
}

pub fn print_outcome(outcome: &SubmitOutcome, json: bool) {
    if json {
        print_pretty(outcome);
        return;
    }
    if outcome.accepted {
        println!(
            "Vote accepted: winner now {}, loser now {}",
            outcome.new_winner_rating.unwrap_or_default(),
            outcome.new_loser_rating.unwrap_or_default()
        );
    } else {
        println!("Vote denied: {}", outcome.message.as_deref().unwrap_or("denied"));
    }
}

pub fn print_flush(report: &FlushReport, pending: usize, json: bool) {
    if json {
        print_pretty(report);
        return;
    }
    println!(
        "Flushed: {} applied, {} failed ({} dropped), {} still queued",
        report.succeeded, report.failed, report.dropped, pending
    );
}

pub fn print_stats(voting: &VotingStats, queue: &QueueStats, remote_votes_today: Option<u64>, json: bool) {
    if json {
        print_pretty(&JsonStats { voting, queue, remote_votes_today });
        return;
    }

    let mut rows: Vec<(&str, String)> = vec![
        ("Voter", voting.voter_id.clone()),
        ("Signed in", voting.is_authenticated.to_string()),
        ("Privileged", voting.is_privileged.to_string()),
        ("Votes (last hour)", format!("{} ({} left)", voting.votes_last_hour, voting.remaining_this_hour)),
        ("Votes (last day)", format!("{} ({} left)", voting.votes_last_day, voting.remaining_today)),
        ("Pairs judged", format!("{} / {}", voting.unique_pairs, voting.total_pairs)),
        ("Cooldown", format!("{}ms", voting.cooldown_remaining_ms)),
    ];
    if let Some(n) = remote_votes_today {
        rows.push(("Recorded remotely (day)", n.to_string()));
    }
    rows.extend([
        ("Queued votes", queue.pending.to_string()),
        (
            "Oldest queued",
            queue.oldest_age_ms.map_or_else(|| "-".to_string(), |ms| format!("{}s ago", ms / 1000)),
        ),
        ("Applied", queue.applied_total.to_string()),
        ("Failed attempts", queue.failed_attempts_total.to_string()),
        (
            "Dropped",
            format!(
                "{} overflow, {} exhausted, {} permanent",
                queue.dropped_overflow, queue.dropped_exhausted, queue.dropped_permanent
            ),
        ),
    ]);

    let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in rows {
        println!("{key:<key_width$} : {value}");
    }
}
