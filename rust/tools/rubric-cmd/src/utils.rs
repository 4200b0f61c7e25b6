//! Output formatting for rubric-cmd

use rubric_compact::TableStats;

/// Formats a size in whole KiB, as `12K`.
pub fn format_k(size: u64) -> String {
    format!("{}K", size / 1024)
}

/// Formats a percentage with at most one decimal.
fn format_percent(part: u64, whole: u64) -> String {
    let percent = (part as f64 * 1000.0 / whole as f64).round() / 10.0;
    format!("{percent}%")
}

/// Describes how a table's size changed during compaction.
pub fn size_change(stats: &TableStats) -> String {
    let (Some(input), Some(output)) = (stats.input_bytes, stats.output_bytes) else {
        return "Done (couldn't stat all the table files)".to_string();
    };
    if input == 0 && output == 0 {
        return "doesn't exist".to_string();
    }
    if output == input {
        return format!("Size unchanged ({})", format_k(output));
    }
    let range = format!("({} -> {})", format_k(input), format_k(output));
    if output < input {
        let delta = input - output;
        format!(
            "Reduced by {} {} {range}",
            format_percent(delta, input),
            format_k(delta)
        )
    } else if input == 0 {
        format!("INCREASED {} {range}", format_k(output))
    } else {
        let delta = output - input;
        format!(
            "INCREASED by {} {} {range}",
            format_percent(delta, input),
            format_k(delta)
        )
    }
}
