//! Topic identity and quality-of-service.

use crate::envelope::topic_id;

/// Durability QoS. `TransientLocal` retains the last `depth` successfully
/// built envelopes for replay to newly subscribing readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    None,
    TransientLocal { depth: usize },
}

/// (name, QoS) pair over a statically typed payload `T`. `type_name` is part
/// of wire identity (`topic_id`) and is supplied by the codec registered for
/// `T`.
#[derive(Debug, Clone)]
pub struct TopicInfo {
    pub domain: String,
    pub name: String,
    pub type_name: String,
    pub durability: Durability,
}

impl TopicInfo {
    pub fn new(
        domain: impl Into<String>,
        name: impl Into<String>,
        type_name: impl Into<String>,
        durability: Durability,
    ) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            type_name: type_name.into(),
            durability,
        }
    }

    pub fn topic_id(&self) -> String {
        topic_id(&self.domain, &self.name, &self.type_name)
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.durability, Durability::TransientLocal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_id_concatenates_in_order() {
        let t = TopicInfo::new("dom", "topic", "Type", Durability::None);
        assert_eq!(t.topic_id(), "domtopicType");
    }
}
