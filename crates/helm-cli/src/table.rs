//! Table formatting using comfy-table.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use helm::{UpgradeOutcome, UpgradeTransaction};

fn styled() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Creates the audit log table, one row per upgrade transaction.
pub fn audit_table(log: &[UpgradeTransaction]) -> Table {
    let mut table = styled();

    table.set_header(
        [
            "#",
            "Source",
            "From",
            "To",
            "Implementation",
            "Executor",
            "Outcome",
            "Proposal",
        ]
        .into_iter()
        .map(|title| Cell::new(title).add_attribute(Attribute::Bold).fg(Color::Cyan)),
    );

    for tx in log {
        let outcome = match &tx.outcome {
            UpgradeOutcome::Success => Cell::new("success").fg(Color::Green),
            UpgradeOutcome::Failed { reason } => {
                Cell::new(format!("failed: {reason}")).fg(Color::Red)
            }
        };
        table.add_row(vec![
            Cell::new(tx.id),
            Cell::new(tx.source),
            Cell::new(tx.from_version),
            Cell::new(tx.to_version),
            Cell::new(&tx.to_implementation),
            Cell::new(&tx.executor),
            outcome,
            Cell::new(tx.proposal_id.map_or_else(|| "-".to_string(), |id| id.to_string())),
        ]);
    }

    table
}

/// Creates a key-value info table (two columns: key and value).
pub fn info_table(entries: &[(&str, String)]) -> Table {
    let mut table = styled();

    for (key, value) in entries {
        table.add_row(vec![Cell::new(key).fg(Color::DarkGrey), Cell::new(value)]);
    }

    table
}
