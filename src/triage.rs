// =============================================================================
// triage.rs — THE SIMD-ACCELERATED COMPLAINT ANNIHILATOR
// =============================================================================
//
// This module is where we decide how seriously to take "the bus is making
// a weird noise". And we decide FAST. How fast? We use:
//
// 1. Aho-Corasick algorithm — multi-pattern matching that scans a report
//    description for ALL grievance keywords simultaneously in a single
//    pass. O(n + m) where n is the text length and m is the number of
//    matches. Built on a finite automaton. This is how antivirus scanners
//    work. We're using antivirus-grade technology to rank complaints about
//    city buses. Let that sink in.
//
// 2. memchr — SIMD-accelerated byte scanning. Uses SSE2/AVX2/NEON vector
//    instructions for a preliminary "is this even a complaint" check
//    before firing up the full automaton.
//
// 3. Rayon parallel iterators — when the admin queue has a hundred pending
//    reports to triage, we scan them across every CPU core. Leaving cores
//    idle while there are grievances to rank is practically criminal
//    negligence.
//
// The output is a severity score (0.0–1.0) and a suggested report type.
// "THE BUS IS ON FIRE AND WE ARE STRANDED" scores high and goes to the top
// of the admin queue. "seat fabric slightly faded" does not.
//
// Is SIMD-accelerated text scanning overkill for two-sentence complaints?
// The answer is yes, and we wouldn't have it any other way.
// =============================================================================

use aho_corasick::AhoCorasick;
use rayon::prelude::*;
use std::sync::LazyLock;
use tracing::debug;

use crate::models::ReportType;

/// The master grievance vocabulary. If ANY of these appear in a report
/// description, the triage scanner takes notice. The more that appear,
/// the more notice it takes. This list was compiled by reading way too
/// many transit complaint forms.
static GRIEVANCE_KEYWORDS: LazyLock<Vec<&str>> = LazyLock::new(|| {
    vec![
        // Delay vocabulary — the genre's classics
        "late",
        "delay",
        "delayed",
        "stuck",
        "traffic",
        "jam",
        "not moving",
        "hasn't moved",
        "no show",
        "never came",
        "never arrived",
        "behind schedule",
        "waiting forever",
        "still waiting",
        // Crowding vocabulary
        "crowded",
        "overcrowded",
        "packed",
        "no seats",
        "no room",
        "standing room",
        "sardine",
        "crush",
        "can't board",
        "cannot board",
        "couldn't board",
        "drove past",
        "didn't stop",
        // Breakdown vocabulary
        "breakdown",
        "broke down",
        "broken down",
        "stalled",
        "engine",
        "won't start",
        "mechanical",
        "overheating",
        "flat tire",
        "tow truck",
        "smoke",
        // Cleanliness vocabulary
        "dirty",
        "filthy",
        "trash",
        "garbage",
        "smell",
        "smelly",
        "sticky",
        "vomit",
        "litter",
        // Deviation vocabulary
        "wrong way",
        "wrong route",
        "wrong direction",
        "detour",
        "off route",
        "skipped my stop",
        "skipping stops",
        // Safety vocabulary
        "unsafe",
        "speeding",
        "reckless",
        "rash driving",
        "accident",
        "crash",
        "collision",
        "harass",
        "fight",
        "drunk",
        "red light",
        "dangerous",
        // Urgency vocabulary — the words that move a report up the queue
        "fire",
        "injured",
        "injury",
        "emergency",
        "ambulance",
        "police",
        "stranded",
        "evacuate",
        "help",
    ]
});

/// The subset of the vocabulary that signals urgency rather than mere
/// inconvenience. A report that combines a grievance with one of these
/// gets a severity bump — annoyed is not the same as endangered.
const URGENCY_TERMS: [&str; 11] = [
    "fire", "injured", "injury", "emergency", "ambulance", "police", "stranded", "evacuate",
    "accident", "crash", "collision",
];

/// Keywords suggesting a DELAY report
static DELAY_KEYWORDS: LazyLock<Vec<&str>> = LazyLock::new(|| {
    vec![
        "late",
        "delay",
        "delayed",
        "stuck",
        "traffic",
        "jam",
        "not moving",
        "no show",
        "never came",
        "behind schedule",
        "still waiting",
    ]
});

/// Keywords suggesting an OVERCROWDING report
static CROWDING_KEYWORDS: LazyLock<Vec<&str>> = LazyLock::new(|| {
    vec![
        "crowded",
        "overcrowded",
        "packed",
        "no seats",
        "no room",
        "standing room",
        "sardine",
        "crush",
        "can't board",
        "cannot board",
        "couldn't board",
    ]
});

/// Keywords suggesting a BREAKDOWN report
static BREAKDOWN_KEYWORDS: LazyLock<Vec<&str>> = LazyLock::new(|| {
    vec![
        "breakdown",
        "broke down",
        "broken down",
        "stalled",
        "engine",
        "won't start",
        "mechanical",
        "overheating",
        "flat tire",
        "tow truck",
        "smoke",
    ]
});

/// Keywords suggesting a CLEANLINESS report
static CLEANLINESS_KEYWORDS: LazyLock<Vec<&str>> = LazyLock::new(|| {
    vec![
        "dirty", "filthy", "trash", "garbage", "smell", "smelly", "sticky", "vomit", "litter",
    ]
});

/// Keywords suggesting a ROUTE_DEVIATION report
static DEVIATION_KEYWORDS: LazyLock<Vec<&str>> = LazyLock::new(|| {
    vec![
        "wrong way",
        "wrong route",
        "wrong direction",
        "detour",
        "off route",
        "skipped my stop",
        "skipping stops",
    ]
});

/// Keywords suggesting a SAFETY_ISSUE report
static SAFETY_KEYWORDS: LazyLock<Vec<&str>> = LazyLock::new(|| {
    vec![
        "unsafe",
        "speeding",
        "reckless",
        "rash driving",
        "accident",
        "crash",
        "collision",
        "harass",
        "fight",
        "drunk",
        "red light",
        "dangerous",
    ]
});

/// The Aho-Corasick automaton for the master vocabulary.
/// Built once, used forever. A finite state machine that matches ALL
/// keywords simultaneously in a single pass — the algorithmic equivalent
/// of reading a complaint and circling every alarming word at once.
static GRIEVANCE_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&*GRIEVANCE_KEYWORDS)
        .expect("Failed to build Aho-Corasick automaton — the keywords are invalid somehow")
});

static DELAY_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&*DELAY_KEYWORDS)
        .expect("Failed to build delay automaton")
});

static CROWDING_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&*CROWDING_KEYWORDS)
        .expect("Failed to build crowding automaton")
});

static BREAKDOWN_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&*BREAKDOWN_KEYWORDS)
        .expect("Failed to build breakdown automaton")
});

static CLEANLINESS_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&*CLEANLINESS_KEYWORDS)
        .expect("Failed to build cleanliness automaton")
});

static DEVIATION_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&*DEVIATION_KEYWORDS)
        .expect("Failed to build deviation automaton")
});

static SAFETY_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&*SAFETY_KEYWORDS)
        .expect("Failed to build safety automaton")
});

/// Result of triaging one report description.
#[derive(Debug, Clone)]
pub struct TriageResult {
    /// Severity score from 0.0 to 1.0
    pub severity: f64,
    /// How many grievance keywords were found (urgency terms excluded)
    pub grievance_hits: usize,
    /// How many urgency keywords were found
    pub urgency_hits: usize,
    /// Total keyword matches
    pub total_matches: usize,
    /// Best-guess report type from the vocabulary, if any category won
    pub suggested_type: Option<ReportType>,
    /// The keywords that matched (for debugging/logging)
    pub matched_keywords: Vec<String>,
}

impl TriageResult {
    fn empty() -> Self {
        TriageResult {
            severity: 0.0,
            grievance_hits: 0,
            urgency_hits: 0,
            total_matches: 0,
            suggested_type: None,
            matched_keywords: vec![],
        }
    }
}

/// Triage a report description.
///
/// This is the main entry point for description analysis. It runs the
/// Aho-Corasick automaton over the text and computes a severity score from
/// keyword variety and density.
///
/// The severity algorithm:
/// - Base score from unique keyword variety (broad vocabulary = credible)
/// - Density bonus (matches per word)
/// - Cross-domain bonus for combining a grievance with an urgency term
/// - High-signal bonus for the genuinely scary words
/// - Capped at 1.0
///
/// "Bus broke down, engine smoking, passengers stranded" scores near the
/// top. "bus" alone scores zero — a bus report mentioning a bus is not
/// news.
pub fn scan_description(text: &str) -> TriageResult {
    if text.is_empty() {
        return TriageResult::empty();
    }

    // SIMD-accelerated preliminary check using memchr. If none of the
    // hot fragments appear, we skip the full automaton entirely.
    // This is the "bouncer at the door" check.
    if !quick_grievance_check(text) {
        return TriageResult::empty();
    }

    // Full Aho-Corasick scan — find ALL matching keywords in one pass
    let matches: Vec<_> = GRIEVANCE_AUTOMATON.find_iter(text).collect();

    let total_matches = matches.len();
    if total_matches == 0 {
        return TriageResult::empty();
    }

    // Collect unique matched keywords
    let mut matched_keywords: Vec<String> = matches
        .iter()
        .map(|m| text[m.start()..m.end()].to_lowercase())
        .collect();
    matched_keywords.sort();
    matched_keywords.dedup();

    let urgency_hits = matched_keywords
        .iter()
        .filter(|k| URGENCY_TERMS.iter().any(|u| k.contains(u)))
        .count();

    let grievance_hits = total_matches - urgency_hits.min(total_matches);

    // Word count for density scoring
    let word_count = text.split_whitespace().count().max(1) as f64;

    // Severity scoring
    let mut severity: f64 = 0.0;

    // Base score from unique keyword variety (0.0 - 0.4)
    let unique_ratio = matched_keywords.len() as f64 / GRIEVANCE_KEYWORDS.len() as f64;
    severity += (unique_ratio * 4.0).min(0.4);

    // Density bonus (0.0 - 0.3)
    let density = total_matches as f64 / word_count;
    severity += (density * 30.0).min(0.3);

    // Cross-domain bonus: a grievance AND an urgency term (0.0 - 0.2)
    if grievance_hits > 0 && urgency_hits > 0 {
        severity += 0.2;
    }

    // High-signal keyword bonus (0.0 - 0.1)
    let high_signal = [
        "fire", "injured", "accident", "crash", "stranded", "broke down", "breakdown",
    ];
    let high_signal_count = matched_keywords
        .iter()
        .filter(|k| high_signal.iter().any(|hs| k.contains(hs)))
        .count();
    severity += (high_signal_count as f64 * 0.05).min(0.1);

    // Cap at 1.0
    severity = severity.min(1.0);

    let suggested_type = classify_grievance(text);

    debug!(
        total_matches = total_matches,
        unique_keywords = matched_keywords.len(),
        grievance_hits = grievance_hits,
        urgency_hits = urgency_hits,
        severity = format!("{:.3}", severity),
        "Description triage complete"
    );

    TriageResult {
        severity,
        grievance_hits,
        urgency_hits,
        total_matches,
        suggested_type,
        matched_keywords,
    }
}

/// Classify a description into a suggested report type.
/// One automaton per category; the category with the most hits wins.
/// Ties go to the scarier category, which is why the ordering below
/// checks safety and breakdown first.
fn classify_grievance(text: &str) -> Option<ReportType> {
    let safety_hits = SAFETY_AUTOMATON.find_iter(text).count();
    let breakdown_hits = BREAKDOWN_AUTOMATON.find_iter(text).count();
    let crowding_hits = CROWDING_AUTOMATON.find_iter(text).count();
    let delay_hits = DELAY_AUTOMATON.find_iter(text).count();
    let deviation_hits = DEVIATION_AUTOMATON.find_iter(text).count();
    let cleanliness_hits = CLEANLINESS_AUTOMATON.find_iter(text).count();

    let max_hits = safety_hits
        .max(breakdown_hits)
        .max(crowding_hits)
        .max(delay_hits)
        .max(deviation_hits)
        .max(cleanliness_hits);

    if max_hits == 0 {
        return None;
    }

    if safety_hits == max_hits {
        Some(ReportType::SafetyIssue)
    } else if breakdown_hits == max_hits {
        Some(ReportType::Breakdown)
    } else if crowding_hits == max_hits {
        Some(ReportType::Overcrowding)
    } else if delay_hits == max_hits {
        Some(ReportType::Delay)
    } else if deviation_hits == max_hits {
        Some(ReportType::RouteDeviation)
    } else {
        Some(ReportType::Cleanliness)
    }
}

/// Batch-triage multiple descriptions in parallel using Rayon.
///
/// When the admin queue has N pending reports and the machine has M cores,
/// why not use all M? Rayon's work-stealing scheduler distributes the
/// scans efficiently. It's like having a fleet of buses delivering
/// passengers, except the passengers are severity scores and the buses
/// actually run on schedule.
pub fn batch_scan(texts: &[&str]) -> Vec<TriageResult> {
    texts.par_iter().map(|text| scan_description(text)).collect()
}

/// Quick check whether a text contains ANY grievance-adjacent fragment.
/// Uses memchr SIMD scanning for maximum speed.
///
/// This is the "should I even bother?" function. If this returns false,
/// the description is definitely not an actionable complaint. If it
/// returns true, we run the full scan to be sure.
pub fn quick_grievance_check(text: &str) -> bool {
    let bytes = text.as_bytes();
    memchr::memmem::find(bytes, b"late").is_some()
        || memchr::memmem::find(bytes, b"Late").is_some()
        || memchr::memmem::find(bytes, b"LATE").is_some()
        || memchr::memmem::find(bytes, b"delay").is_some()
        || memchr::memmem::find(bytes, b"Delay").is_some()
        || memchr::memmem::find(bytes, b"crowd").is_some()
        || memchr::memmem::find(bytes, b"Crowd").is_some()
        || memchr::memmem::find(bytes, b"CROWD").is_some()
        || memchr::memmem::find(bytes, b"brok").is_some()
        || memchr::memmem::find(bytes, b"Brok").is_some()
        || memchr::memmem::find(bytes, b"pack").is_some()
        || memchr::memmem::find(bytes, b"stuck").is_some()
        || memchr::memmem::find(bytes, b"Stuck").is_some()
        || memchr::memmem::find(bytes, b"dirt").is_some()
        || memchr::memmem::find(bytes, b"smell").is_some()
        || memchr::memmem::find(bytes, b"wrong").is_some()
        || memchr::memmem::find(bytes, b"unsafe").is_some()
        || memchr::memmem::find(bytes, b"fire").is_some()
        || memchr::memmem::find(bytes, b"Fire").is_some()
        || memchr::memmem::find(bytes, b"FIRE").is_some()
        || memchr::memmem::find(bytes, b"accident").is_some()
        || memchr::memmem::find(bytes, b"crash").is_some()
        || memchr::memmem::find(bytes, b"strand").is_some()
        || memchr::memmem::find(bytes, b"engine").is_some()
        || memchr::memmem::find(bytes, b"seat").is_some()
        || memchr::memmem::find(bytes, b"stop").is_some()
        || memchr::memmem::find(bytes, b"driv").is_some()
        || memchr::memmem::find(bytes, b"wait").is_some()
        || memchr::memmem::find(bytes, b"traffic").is_some()
        || memchr::memmem::find(bytes, b"no ").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_description_is_zero_severity() {
        let result = scan_description("");
        assert_eq!(result.severity, 0.0);
        assert_eq!(result.suggested_type, None);
    }

    #[test]
    fn test_irrelevant_text_scores_zero() {
        let result = scan_description("lovely weather this afternoon");
        assert_eq!(result.severity, 0.0);
    }

    #[test]
    fn test_breakdown_with_urgency_scores_high() {
        let text = "The bus broke down in the middle of the bridge, engine smoking, \
                    and forty passengers are stranded waiting for a tow truck. \
                    Someone called the police.";
        let result = scan_description(text);
        assert!(result.severity > 0.5, "severity was {}", result.severity);
        assert!(result.urgency_hits > 0);
        assert_eq!(result.suggested_type, Some(ReportType::Breakdown));
    }

    #[test]
    fn test_mild_delay_scores_lower_than_emergency() {
        let mild = scan_description("bus is a bit late today");
        let emergency = scan_description(
            "accident, bus crash at the intersection, people injured, ambulance on the way",
        );
        assert!(mild.severity < emergency.severity);
    }

    #[test]
    fn test_classification_picks_the_dominant_category() {
        let result = scan_description("completely packed, overcrowded, no seats, couldn't board");
        assert_eq!(result.suggested_type, Some(ReportType::Overcrowding));

        let result = scan_description("driver was speeding and ran a red light, felt dangerous");
        assert_eq!(result.suggested_type, Some(ReportType::SafetyIssue));
    }

    #[test]
    fn test_batch_scan_parallel() {
        let texts = vec![
            "bus broke down engine smoking stranded",
            "the cat sat on the mat",
            "overcrowded packed no seats",
        ];
        let results = batch_scan(&texts);
        assert_eq!(results.len(), 3);
        assert!(results[0].severity > 0.0);
        assert_eq!(results[1].severity, 0.0);
        assert!(results[2].severity > 0.0);
    }

    #[test]
    fn test_quick_grievance_check() {
        assert!(quick_grievance_check("the bus is late"));
        assert!(quick_grievance_check("engine trouble"));
        assert!(!quick_grievance_check("thank you kindly"));
    }
}
