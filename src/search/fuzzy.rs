use levenshtein_automata::{Distance, LevenshteinAutomatonBuilder, DFA};

/// Automaton for fuzzy token matching with edit distance
///
/// UTF-8 patterns run through a Levenshtein DFA and count edits per
/// character. Other patterns fall back to byte-level `edit_distance`.
pub struct FuzzyAutomaton {
    /// The target term to match
    term: Vec<u8>,

    /// Maximum allowed edit distance (typically 1-2)
    max_edit_distance: u8,

    /// Allow adjacent transpositions (teh -> the)
    transpositions: bool,

    dfa: Option<DFA>,
}

impl FuzzyAutomaton {
    pub fn new(term: &[u8], max_edit_distance: u8, transpositions: bool) -> Self {
        let dfa = std::str::from_utf8(term).ok().map(|text| {
            LevenshteinAutomatonBuilder::new(max_edit_distance, transpositions).build_dfa(text)
        });

        FuzzyAutomaton {
            term: term.to_vec(),
            max_edit_distance,
            transpositions,
            dfa,
        }
    }

    /// Check if a candidate matches within edit distance
    pub fn matches(&self, candidate: &[u8]) -> bool {
        match &self.dfa {
            Some(dfa) => {
                let mut state = dfa.initial_state();
                for &byte in candidate {
                    state = dfa.transition(state, byte);
                }
                matches!(dfa.distance(state), Distance::Exact(d) if d <= self.max_edit_distance)
            }
            None => {
                edit_distance(&self.term, candidate, self.transpositions) <= self.max_edit_distance as usize
            }
        }
    }
}

/// Byte-level Levenshtein distance. With `transpositions`, swapping two
/// adjacent bytes costs one edit (optimal string alignment).
pub fn edit_distance(a: &[u8], b: &[u8], transpositions: bool) -> usize {
    let len_a = a.len();
    let len_b = b.len();

    if len_a == 0 {
        return len_b;
    }
    if len_b == 0 {
        return len_a;
    }

    let mut prev_prev: Vec<usize> = vec![0; len_b + 1];
    let mut prev_row: Vec<usize> = (0..=len_b).collect();
    let mut curr_row = vec![0; len_b + 1];

    for i in 1..=len_a {
        curr_row[0] = i;

        for j in 1..=len_b {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };

            curr_row[j] = std::cmp::min(
                std::cmp::min(
                    prev_row[j] + 1,     // deletion
                    curr_row[j - 1] + 1, // insertion
                ),
                prev_row[j - 1] + cost,  // substitution
            );

            if transpositions && i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                curr_row[j] = std::cmp::min(curr_row[j], prev_prev[j - 2] + 1);
            }
        }

        std::mem::swap(&mut prev_prev, &mut prev_row);
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[len_b]
}

/// Cheaper check when only "within `max`" matters.
pub fn within_distance(a: &[u8], b: &[u8], max: usize, transpositions: bool) -> bool {
    if a.len().abs_diff(b.len()) > max {
        return false;
    }
    edit_distance(a, b, transpositions) <= max
}
