//! Key layout under the coordinator for one consumer group.
//!
//! ```text
//! /consumers/<group>/ids/<member-id>          ephemeral, member registration
//! /consumers/<group>/owners/<topic>/<part>    ephemeral, exclusive claim
//! /consumers/<group>/offsets/<topic>/<part>   persistent, committed offset
//! ```

pub fn group_root(group: &str) -> String {
    format!("/consumers/{group}")
}

pub fn ids_dir(group: &str) -> String {
    format!("{}/ids", group_root(group))
}

pub fn id_path(group: &str, member_id: &str) -> String {
    format!("{}/{}", ids_dir(group), member_id)
}

pub fn owners_dir(group: &str) -> String {
    format!("{}/owners", group_root(group))
}

pub fn owner_topic_dir(group: &str, topic: &str) -> String {
    format!("{}/{}", owners_dir(group), topic)
}

pub fn owner_path(group: &str, topic: &str, partition: u32) -> String {
    format!("{}/{}", owner_topic_dir(group, topic), partition)
}

pub fn offsets_dir(group: &str) -> String {
    format!("{}/offsets", group_root(group))
}

pub fn offset_topic_dir(group: &str, topic: &str) -> String {
    format!("{}/{}", offsets_dir(group), topic)
}

pub fn offset_path(group: &str, topic: &str, partition: u32) -> String {
    format!("{}/{}", offset_topic_dir(group, topic), partition)
}
