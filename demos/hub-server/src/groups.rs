//! Group state held by the hub.

use hubline_core::{JoinReply, JoinRequest};
use std::collections::{BTreeSet, HashMap};

pub struct Group {
    pub key: String,
    /// Caller id of the first joiner. Survives that caller dropping out.
    pub host: String,
    pub connected: BTreeSet<String>,
    pub started: bool,
    pub rounds: u32,
}

impl Group {
    fn new(key: String, host: String) -> Self {
        Self {
            key,
            host,
            connected: BTreeSet::new(),
            started: false,
            rounds: 0,
        }
    }

    fn reply_for(&self, caller_id: &str) -> JoinReply {
        JoinReply {
            group_key: self.key.clone(),
            is_host: self.host == caller_id,
            members: self.connected.len() as u32,
        }
    }
}

#[derive(Default)]
pub struct Groups {
    groups: HashMap<String, Group>,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join or rejoin. A rejoin needs the group to still exist.
    pub fn join(&mut self, request: &JoinRequest) -> anyhow::Result<JoinReply> {
        if request.is_reconnect && !self.groups.contains_key(&request.group_key) {
            anyhow::bail!("group {} no longer exists", request.group_key);
        }
        let group = self
            .groups
            .entry(request.group_key.clone())
            .or_insert_with(|| Group::new(request.group_key.clone(), request.caller_id.clone()));
        group.connected.insert(request.caller_id.clone());
        Ok(group.reply_for(&request.caller_id))
    }

    /// Mark a caller as gone. Empty groups are kept so the caller can rejoin.
    pub fn leave(&mut self, group_key: &str, caller_id: &str) {
        if let Some(group) = self.groups.get_mut(group_key) {
            group.connected.remove(caller_id);
        }
    }

    pub fn start(&mut self, group_key: &str) -> anyhow::Result<()> {
        let group = self.get_mut(group_key)?;
        if group.started {
            anyhow::bail!("game {} already started", group_key);
        }
        group.started = true;
        Ok(())
    }

    /// Returns the new round count.
    pub fn add_round(&mut self, group_key: &str) -> anyhow::Result<u32> {
        let group = self.get_mut(group_key)?;
        group.rounds += 1;
        Ok(group.rounds)
    }

    fn get_mut(&mut self, group_key: &str) -> anyhow::Result<&mut Group> {
        self.groups
            .get_mut(group_key)
            .ok_or_else(|| anyhow::anyhow!("game {} not found", group_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_joiner_hosts_and_keeps_role_on_rejoin() {
        let mut groups = Groups::new();
        assert!(groups.join(&JoinRequest::new("ABCD", "u1")).unwrap().is_host);
        let guest = groups.join(&JoinRequest::new("ABCD", "u2")).unwrap();
        assert!(!guest.is_host);
        assert_eq!(guest.members, 2);

        groups.leave("ABCD", "u1");
        let back = groups.join(&JoinRequest::rejoin("ABCD", "u1")).unwrap();
        assert!(back.is_host);
        assert_eq!(back.members, 2);
    }

    #[test]
    fn rejoin_of_unknown_group_fails() {
        let mut groups = Groups::new();
        assert!(groups.join(&JoinRequest::rejoin("ZZZZ", "u1")).is_err());
    }

    #[test]
    fn rounds_and_start() {
        let mut groups = Groups::new();
        groups.join(&JoinRequest::new("ABCD", "u1")).unwrap();
        assert_eq!(groups.add_round("ABCD").unwrap(), 1);
        assert_eq!(groups.add_round("ABCD").unwrap(), 2);
        groups.start("ABCD").unwrap();
        assert!(groups.start("ABCD").is_err());
        assert!(groups.add_round("WXYZ").is_err());
    }
}
