//! # Feeds
//!
//! Every value the vehicle exchanges with the operator travels on a *feed*, a topic of the form
//! `<user>/feeds/<key>`. Feed keys are configured in short form (for example `robot.speed`) and
//! resolved here into full topics once at startup.
//!
//! Dashboards are not consistent about how they spell a key. Depending on the client a key may or
//! may not carry the project prefix, and dots may be written as `-dot-`. Inbound feeds are
//! therefore subscribed under every equivalent spelling, all of which map back to the same logical
//! feed in the [`FeedTable`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::collections::HashMap;

use crate::tc::TcKind;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Spelling of a dot used by some dashboards.
const DOT_WORD: &str = "-dot-";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Short keys of each feed, as written in the parameter file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedKeys {
    pub startstop: String,
    pub speed: String,
    pub emergency: String,
    pub mode: String,
    pub line: String,
    pub distance: String,
    pub motor_l: String,
    pub motor_r: String,
    pub heartbeat: String,
    pub status: String,
}

/// Operator account and project prefix used to build topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedNamer {
    pub user: String,
    pub prefix: String,
}

/// Every topic the vehicle uses, resolved once at startup.
#[derive(Debug, Clone)]
pub struct FeedTable {
    inbound: HashMap<String, TcKind>,

    /// Provider throttle notices
    pub throttle: String,

    pub motor_l: String,
    pub motor_r: String,
    pub heartbeat: String,
    pub status: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What an inbound topic means to the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Command(TcKind),
    Throttle,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for FeedKeys {
    fn default() -> Self {
        Self {
            startstop: String::from("robot.startstop"),
            speed: String::from("robot.speed"),
            emergency: String::from("robot.emergency"),
            mode: String::from("robot.mode"),
            line: String::from("robot.line"),
            distance: String::from("robot.distance"),
            motor_l: String::from("robot.motor-l"),
            motor_r: String::from("robot.motor-r"),
            heartbeat: String::from("robot.heartbeat"),
            status: String::from("robot.status"),
        }
    }
}

impl FeedKeys {
    /// The configured key of an inbound command feed.
    pub fn command_key(&self, kind: TcKind) -> &str {
        match kind {
            TcKind::StartStop => &self.startstop,
            TcKind::Emergency => &self.emergency,
            TcKind::Speed => &self.speed,
            TcKind::Mode => &self.mode,
            TcKind::Line => &self.line,
            TcKind::Distance => &self.distance,
        }
    }
}

impl FeedNamer {
    pub fn new(user: &str, prefix: &str) -> Self {
        Self {
            user: user.trim().to_string(),
            prefix: prefix.trim().to_string(),
        }
    }

    fn feeds_root(&self) -> String {
        format!("{}/feeds/", self.user)
    }

    /// Resolve a configured key into a full topic.
    ///
    /// - Keys which are already full topics are used as they are.
    /// - Keys spelled with `-dot-` are used without adding the prefix.
    /// - Otherwise the prefix is added unless it is already there.
    pub fn feed(&self, key: &str) -> String {
        let key = key.trim();
        let root = self.feeds_root();

        if key.starts_with(&root) {
            return key.to_string();
        }

        if key.contains(DOT_WORD) {
            return format!("{}{}", root, key);
        }

        let dotted_prefix = format!("{}.", self.prefix);
        if key.starts_with(&dotted_prefix) {
            format!("{}{}", root, key)
        } else {
            format!("{}{}{}", root, dotted_prefix, key)
        }
    }

    /// Every equivalent spelling of a full topic, deduplicated, the given topic first.
    ///
    /// Spellings are the key with and without the prefix, each written both with dots and with
    /// `-dot-`. Topics outside this user's feeds have no aliases.
    pub fn aliases(&self, topic: &str) -> Vec<String> {
        let root = self.feeds_root();
        let key = match topic.strip_prefix(&root) {
            Some(k) => k,
            None => return vec![topic.to_string()],
        };

        let prefix_word = format!("{}{}", self.prefix, DOT_WORD);
        let prefix_dot = format!("{}.", self.prefix);
        let no_prefix_key = key
            .strip_prefix(&prefix_word)
            .or_else(|| key.strip_prefix(&prefix_dot))
            .unwrap_or(key);

        let (with_word, with_dot) = spellings(key);
        let (without_word, without_dot) = spellings(no_prefix_key);

        let mut topics = vec![topic.to_string()];
        for k in [with_word, with_dot, without_word, without_dot] {
            let t = format!("{}{}", root, k);
            if !topics.contains(&t) {
                topics.push(t);
            }
        }

        topics
    }

    /// The provider's throttle notice topic.
    pub fn throttle(&self) -> String {
        format!("{}/throttle", self.user)
    }
}

impl FeedTable {
    /// Resolve every feed. Inbound command feeds are expanded to all of their aliases.
    pub fn new(namer: &FeedNamer, keys: &FeedKeys) -> Self {
        let mut inbound = HashMap::new();

        for kind in TcKind::ALL.iter() {
            let topic = namer.feed(keys.command_key(*kind));
            for alias in namer.aliases(&topic) {
                // First feed to claim an alias keeps it
                inbound.entry(alias).or_insert(*kind);
            }
        }

        Self {
            inbound,
            throttle: namer.throttle(),
            motor_l: namer.feed(&keys.motor_l),
            motor_r: namer.feed(&keys.motor_r),
            heartbeat: namer.feed(&keys.heartbeat),
            status: namer.feed(&keys.status),
        }
    }

    /// Classify an inbound topic, `None` if it is not one of ours.
    pub fn classify(&self, topic: &str) -> Option<Inbound> {
        if topic == self.throttle {
            return Some(Inbound::Throttle);
        }

        self.inbound.get(topic).copied().map(Inbound::Command)
    }

    /// Every topic to subscribe to, sorted so the order is stable.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inbound.keys().cloned().collect();
        topics.sort();
        topics.push(self.throttle.clone());
        topics
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// The `-dot-` and dotted spellings of a key.
fn spellings(key: &str) -> (String, String) {
    if key.contains(DOT_WORD) {
        (key.to_string(), key.replace(DOT_WORD, "."))
    } else {
        (key.replace('.', DOT_WORD), key.to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn namer() -> FeedNamer {
        FeedNamer::new("alice", "smartpath")
    }

    #[test]
    fn test_feed_resolution() {
        let n = namer();

        assert_eq!(n.feed("robot.speed"), "alice/feeds/smartpath.robot.speed");
        assert_eq!(
            n.feed("smartpath.robot.speed"),
            "alice/feeds/smartpath.robot.speed"
        );
        assert_eq!(
            n.feed("smartpath-dot-robot-dot-speed"),
            "alice/feeds/smartpath-dot-robot-dot-speed"
        );
        assert_eq!(n.feed("alice/feeds/custom"), "alice/feeds/custom");
        assert_eq!(n.throttle(), "alice/throttle");
    }

    #[test]
    fn test_aliases() {
        let n = namer();
        let aliases = n.aliases("alice/feeds/smartpath-dot-robot-dot-emergency");

        assert_eq!(aliases.len(), 4);
        assert_eq!(aliases[0], "alice/feeds/smartpath-dot-robot-dot-emergency");
        for t in [
            "alice/feeds/smartpath.robot.emergency",
            "alice/feeds/robot-dot-emergency",
            "alice/feeds/robot.emergency",
        ] {
            assert!(aliases.contains(&String::from(t)), "missing {}", t);
        }

        // A key without dots or prefix has only one spelling
        assert_eq!(n.aliases("alice/feeds/stop"), vec!["alice/feeds/stop"]);
        assert_eq!(n.aliases("bob/feeds/x.y"), vec!["bob/feeds/x.y"]);
    }

    #[test]
    fn test_feed_table() {
        let table = FeedTable::new(&namer(), &FeedKeys::default());

        assert_eq!(
            table.classify("alice/feeds/robot-dot-speed"),
            Some(Inbound::Command(TcKind::Speed))
        );
        assert_eq!(
            table.classify("alice/feeds/smartpath.robot.emergency"),
            Some(Inbound::Command(TcKind::Emergency))
        );
        assert_eq!(table.classify("alice/throttle"), Some(Inbound::Throttle));
        assert_eq!(table.classify("alice/feeds/smartpath.robot.heartbeat"), None);

        let subs = table.subscriptions();
        assert_eq!(subs.len(), 6 * 4 + 1);
        assert_eq!(subs.last().map(String::as_str), Some("alice/throttle"));
        assert_eq!(table.heartbeat, "alice/feeds/smartpath.robot.heartbeat");
    }
}
