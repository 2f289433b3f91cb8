//! Worker name candidates

use rand::seq::IndexedRandom;
use rand::Rng;

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "dapper", "eager", "fancy", "gentle", "hasty", "icy", "jolly",
    "keen", "lively", "mellow", "nimble", "odd", "plucky", "quiet", "rapid", "sunny", "tidy",
    "upbeat", "vivid", "witty", "young", "zesty",
];

const ANIMALS: &[&str] = &[
    "badger", "crane", "dingo", "eagle", "ferret", "gecko", "heron", "ibis", "jackal", "koala",
    "lemur", "marmot", "newt", "otter", "panda", "quail", "raven", "stoat", "tapir", "urchin",
    "vole", "walrus", "yak", "zebra",
];

/// Host name up to the first dot
pub fn short_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .map(|h| h.split('.').next().unwrap_or_default().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Random `adjective-animal@host` name
///
/// After `attempt` gets large the pool is likely crowded, so a numeric
/// suffix widens it.
pub fn candidate_name(host: &str, attempt: u32) -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("plain");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("worker");

    if attempt < 20 {
        format!("{}-{}@{}", adjective, animal, host)
    } else {
        let suffix: u32 = rng.random_range(0..10_000);
        format!("{}-{}-{}@{}", adjective, animal, suffix, host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_shape() {
        let name = candidate_name("node1", 0);
        let (words, host) = name.split_once('@').unwrap();
        assert_eq!(host, "node1");
        let (adjective, animal) = words.split_once('-').unwrap();
        assert!(ADJECTIVES.contains(&adjective));
        assert!(ANIMALS.contains(&animal));

        let crowded = candidate_name("node1", 50);
        assert_eq!(crowded.split('-').count(), 3);
    }

    #[test]
    fn test_short_hostname_has_no_domain() {
        let host = short_hostname();
        assert!(!host.is_empty());
        assert!(!host.contains('.'));
    }
}
