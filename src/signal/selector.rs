//! Seed and target channel selectors.
//!
//! A selector is either an explicit list of channel names or a channel type. Type selectors can
//! split the matching channels by re-referencing scheme, so that recordings mixing, e.g., bipolar
//! and common average channels are analysed as separate sub-problems.
use serde::{Deserialize, Serialize};
use std::fmt;

use super::channel::{ChannelInfo, ChannelType};
use crate::error::MIError;

/// The prefix of a type selector written as a string, e.g., "type_ecog".
const TYPE_PREFIX: &str = "type_";

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(try_from = "SelectorRepr", into = "SelectorRepr")]
pub enum ChannelSelector {
    ByName(Vec<String>),
    ByType {
        ch_type: ChannelType,
        split_by_reference: bool,
    },
}

/// The serialized forms of a selector: a single name, a list of names, "type_<type>", or an
/// explicit type record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    One(String),
    Many(Vec<String>),
    Typed {
        ch_type: String,
        split_by_reference: bool,
    },
}

impl TryFrom<SelectorRepr> for ChannelSelector {
    type Error = MIError;

    fn try_from(repr: SelectorRepr) -> Result<Self, Self::Error> {
        match repr {
            SelectorRepr::One(name) => ChannelSelector::parse(&name),
            SelectorRepr::Many(names) => Ok(ChannelSelector::ByName(names)),
            SelectorRepr::Typed {
                ch_type,
                split_by_reference,
            } => Ok(ChannelSelector::ByType {
                ch_type: ChannelType::from(ch_type),
                split_by_reference,
            }),
        }
    }
}

impl From<ChannelSelector> for SelectorRepr {
    fn from(selector: ChannelSelector) -> Self {
        match selector {
            ChannelSelector::ByName(names) => SelectorRepr::Many(names),
            ChannelSelector::ByType {
                ch_type,
                split_by_reference: true,
            } => SelectorRepr::One(format!("{}{}", TYPE_PREFIX, ch_type)),
            ChannelSelector::ByType {
                ch_type,
                split_by_reference: false,
            } => SelectorRepr::Typed {
                ch_type: ch_type.to_string(),
                split_by_reference: false,
            },
        }
    }
}

/// A resolved set of channels, identified by its label.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ChannelGroup {
    pub label: String,
    pub indices: Vec<usize>,
    pub names: Vec<String>,
}

impl ChannelGroup {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl ChannelSelector {
    /// Parse a selector from a single string.
    /// A string "type_<type>" selects all channels of that type, split by reference scheme.
    /// Any other string selects the channel with that name.
    pub fn parse(selector: &str) -> Result<Self, MIError> {
        match selector.strip_prefix(TYPE_PREFIX) {
            Some("") => Err(MIError::InvalidParameter(format!(
                "the type selector '{}' does not name a channel type",
                selector
            ))),
            Some(ch_type) => Ok(ChannelSelector::ByType {
                ch_type: ChannelType::from(ch_type),
                split_by_reference: true,
            }),
            None => Ok(ChannelSelector::ByName(vec![selector.to_string()])),
        }
    }

    /// Resolve the selector against the channels of a signal.
    /// The function returns an error if no channel matches, or if a name is requested twice or
    /// matches several channels.
    pub fn resolve(&self, channels: &[ChannelInfo]) -> Result<Vec<ChannelGroup>, MIError> {
        match self {
            ChannelSelector::ByName(names) => {
                if names.is_empty() {
                    return Err(MIError::NoChannelsMatch(
                        "empty list of channel names".to_string(),
                    ));
                }
                let mut indices = Vec::with_capacity(names.len());
                for (pos, name) in names.iter().enumerate() {
                    if names[..pos].contains(name) {
                        return Err(MIError::AmbiguousSelector(format!(
                            "the channel '{}' is listed more than once",
                            name
                        )));
                    }
                    let matches: Vec<usize> = channels
                        .iter()
                        .enumerate()
                        .filter(|(_, ch)| &ch.name == name)
                        .map(|(id, _)| id)
                        .collect();
                    match matches.as_slice() {
                        [] => return Err(MIError::NoChannelsMatch(name.clone())),
                        [id] => indices.push(*id),
                        _ => {
                            return Err(MIError::AmbiguousSelector(format!(
                                "the name '{}' matches {} channels",
                                name,
                                matches.len()
                            )))
                        }
                    }
                }
                Ok(vec![ChannelGroup {
                    label: names.join(","),
                    indices,
                    names: names.clone(),
                }])
            }
            ChannelSelector::ByType {
                ch_type,
                split_by_reference,
            } => {
                let mut groups: Vec<ChannelGroup> = Vec::new();
                for (id, ch) in channels.iter().enumerate() {
                    if &ch.ch_type != ch_type {
                        continue;
                    }
                    let label = match split_by_reference {
                        true => format!("{}_{}", ch_type, ch.reference),
                        false => ch_type.to_string(),
                    };
                    match groups.iter_mut().find(|group| group.label == label) {
                        Some(group) => {
                            group.indices.push(id);
                            group.names.push(ch.name.clone());
                        }
                        None => groups.push(ChannelGroup {
                            label,
                            indices: vec![id],
                            names: vec![ch.name.clone()],
                        }),
                    }
                }
                if groups.is_empty() {
                    return Err(MIError::NoChannelsMatch(self.to_string()));
                }
                Ok(groups)
            }
        }
    }
}

impl fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChannelSelector::ByName(names) => write!(f, "[{}]", names.join(", ")),
            ChannelSelector::ByType { ch_type, .. } => write!(f, "{}{}", TYPE_PREFIX, ch_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<ChannelInfo> {
        vec![
            ChannelInfo::new("ECOG_L_1", ChannelType::Ecog, "bipolar"),
            ChannelInfo::new("ECOG_L_2", ChannelType::Ecog, "common_average"),
            ChannelInfo::new("LFP_L_1", ChannelType::Dbs, "bipolar"),
            ChannelInfo::new("ECOG_L_3", ChannelType::Ecog, "bipolar"),
        ]
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            ChannelSelector::parse("type_dbs").unwrap(),
            ChannelSelector::ByType {
                ch_type: ChannelType::Dbs,
                split_by_reference: true
            }
        );
        assert_eq!(
            ChannelSelector::parse("LFP_L_1").unwrap(),
            ChannelSelector::ByName(vec!["LFP_L_1".to_string()])
        );
        assert!(matches!(
            ChannelSelector::parse("type_"),
            Err(MIError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_deserialize_forms() {
        let sel: ChannelSelector = serde_json::from_str("\"type_ecog\"").unwrap();
        assert!(matches!(sel, ChannelSelector::ByType { split_by_reference: true, .. }));

        let sel: ChannelSelector = serde_json::from_str("[\"ECOG_L_1\", \"ECOG_L_3\"]").unwrap();
        assert_eq!(sel.resolve(&channels()).unwrap()[0].indices, vec![0, 3]);

        let sel: ChannelSelector =
            serde_json::from_str("{\"ch_type\": \"ecog\", \"split_by_reference\": false}")
                .unwrap();
        let json = serde_json::to_string(&sel).unwrap();
        let back: ChannelSelector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sel);
    }

    #[test]
    fn test_resolve_by_type_split() {
        let sel = ChannelSelector::parse("type_ecog").unwrap();
        let groups = sel.resolve(&channels()).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "ecog_bipolar");
        assert_eq!(groups[0].indices, vec![0, 3]);
        assert_eq!(groups[1].label, "ecog_common_average");
        assert_eq!(groups[1].names, vec!["ECOG_L_2".to_string()]);
    }

    #[test]
    fn test_resolve_by_type_merged() {
        let sel = ChannelSelector::ByType {
            ch_type: ChannelType::Ecog,
            split_by_reference: false,
        };
        let groups = sel.resolve(&channels()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].indices, vec![0, 1, 3]);
    }

    #[test]
    fn test_resolve_errors() {
        let sel = ChannelSelector::parse("type_emg").unwrap();
        assert!(matches!(
            sel.resolve(&channels()),
            Err(MIError::NoChannelsMatch(_))
        ));

        let sel = ChannelSelector::ByName(vec!["ECOG_R_1".to_string()]);
        assert!(matches!(
            sel.resolve(&channels()),
            Err(MIError::NoChannelsMatch(_))
        ));

        let sel = ChannelSelector::ByName(vec![]);
        assert!(matches!(
            sel.resolve(&channels()),
            Err(MIError::NoChannelsMatch(_))
        ));

        let sel = ChannelSelector::ByName(vec!["ECOG_L_1".to_string(), "ECOG_L_1".to_string()]);
        assert!(matches!(
            sel.resolve(&channels()),
            Err(MIError::AmbiguousSelector(_))
        ));

        let mut dup = channels();
        dup.push(ChannelInfo::new("LFP_L_1", ChannelType::Dbs, "bipolar"));
        let sel = ChannelSelector::parse("LFP_L_1").unwrap();
        assert!(matches!(sel.resolve(&dup), Err(MIError::AmbiguousSelector(_))));
    }
}
