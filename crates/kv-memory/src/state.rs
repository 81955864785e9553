use crate::error::{Error, Result};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display};
use std::time::Duration;

use bytes::Bytes;
use secret_kv::{
    AuthStatus, KeyValue, Lease, LeaseId, Member, Permission, ROOT, RequestOp, ResponseOp,
    ServerConfig, TxnRequest, TxnResponse,
};
use tokio::time::Instant;
use url::Url;

/// Replicated state shared by every member of one cluster.
#[derive(Debug)]
pub struct Cluster {
    state: parking_lot::Mutex<State>,
}

impl Cluster {
    pub fn new(members: Vec<Member>) -> Self {
        Self {
            state: parking_lot::Mutex::new(State::new(members)),
        }
    }

    /// Locks the state after dropping every lease that expired by now.
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, State> {
        let mut state = self.state.lock();
        state.expire_leases(Instant::now());
        state
    }
}

#[derive(Clone, Copy, Debug)]
enum Access {
    Read,
    Write,
}

impl Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug)]
struct LeaseState {
    expires_at: Instant,
    keys: BTreeSet<Bytes>,
}

#[derive(Debug)]
pub struct State {
    revision: i64,
    kvs: BTreeMap<Bytes, KeyValue>,
    leases: HashMap<LeaseId, LeaseState>,
    next_lease_id: LeaseId,
    members: Vec<Member>,
    auth_enabled: bool,
    roles: BTreeMap<String, Vec<Permission>>,
    users: BTreeMap<String, BTreeSet<String>>,
}

impl State {
    fn new(members: Vec<Member>) -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(ROOT.to_string(), Vec::new());

        Self {
            revision: 1,
            kvs: BTreeMap::new(),
            leases: HashMap::new(),
            next_lease_id: 1,
            members,
            auth_enabled: false,
            roles,
            users: BTreeMap::new(),
        }
    }

    fn expire_leases(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            self.drop_lease(id);
        }
    }

    fn drop_lease(&mut self, id: LeaseId) {
        let Some(lease) = self.leases.remove(&id) else {
            return;
        };

        if !lease.keys.is_empty() {
            self.revision += 1;
            for key in &lease.keys {
                self.kvs.remove(key);
            }
        }
    }

    fn authenticate(&self, user: &str) -> Result<()> {
        if self.auth_enabled && !self.users.contains_key(user) {
            return Err(Error::PermissionDenied(format!("user {user:?} does not exist")));
        }

        Ok(())
    }

    fn authorize_admin(&self, user: &str) -> Result<()> {
        if !self.auth_enabled {
            return Ok(());
        }

        match self.users.get(user) {
            Some(roles) if roles.contains(ROOT) => Ok(()),
            Some(_) => Err(Error::PermissionDenied(format!(
                "user {user:?} does not hold the root role"
            ))),
            None => Err(Error::PermissionDenied(format!("user {user:?} does not exist"))),
        }
    }

    fn authorize_key(&self, user: &str, key: &[u8], access: Access) -> Result<()> {
        if !self.auth_enabled {
            return Ok(());
        }

        let roles = self
            .users
            .get(user)
            .ok_or_else(|| Error::PermissionDenied(format!("user {user:?} does not exist")))?;

        if roles.contains(ROOT) {
            return Ok(());
        }

        let allowed = roles
            .iter()
            .filter_map(|role| self.roles.get(role))
            .flatten()
            .any(|permission| {
                permission.covers(key)
                    && match access {
                        Access::Read => permission.allows_read(),
                        Access::Write => permission.allows_write(),
                    }
            });

        if allowed {
            Ok(())
        } else {
            Err(Error::PermissionDenied(format!(
                "user {user:?} may not {access} {}",
                String::from_utf8_lossy(key)
            )))
        }
    }

    pub fn txn(&mut self, user: &str, request: TxnRequest, max_ops: usize) -> Result<TxnResponse> {
        if request.max_branch_ops() > max_ops || request.compare.len() > max_ops {
            return Err(Error::InvalidArgument(format!(
                "too many operations in transaction (limit {max_ops})"
            )));
        }

        for compare in &request.compare {
            self.authorize_key(user, &compare.key, Access::Read)?;
        }
        for op in request.success.iter().chain(&request.failure) {
            let (key, access) = match op {
                RequestOp::Put { key, .. } | RequestOp::DeleteRange { key } => (key, Access::Write),
                RequestOp::Range { key } => (key, Access::Read),
            };
            self.authorize_key(user, key, access)?;
        }

        let succeeded = request
            .compare
            .iter()
            .all(|compare| compare.evaluate(self.kvs.get(&compare.key)));
        let ops = if succeeded {
            request.success
        } else {
            request.failure
        };

        for op in &ops {
            if let RequestOp::Put {
                lease: Some(id), ..
            } = op
            {
                if !self.leases.contains_key(id) {
                    return Err(Error::NotFound(format!("lease {id}")));
                }
            }
        }

        let mutates = ops.iter().any(|op| match op {
            RequestOp::Put { .. } => true,
            RequestOp::DeleteRange { key } => self.kvs.contains_key(key),
            RequestOp::Range { .. } => false,
        });
        if mutates {
            self.revision += 1;
        }

        let responses = ops.into_iter().map(|op| self.apply(op)).collect();

        Ok(TxnResponse {
            succeeded,
            revision: self.revision,
            responses,
        })
    }

    fn apply(&mut self, op: RequestOp) -> ResponseOp {
        match op {
            RequestOp::Put { key, value, lease } => {
                let kv = match self.kvs.remove(&key) {
                    Some(existing) => {
                        self.detach(&existing);
                        KeyValue {
                            value,
                            mod_revision: self.revision,
                            version: existing.version + 1,
                            lease,
                            ..existing
                        }
                    }
                    None => KeyValue {
                        key: key.clone(),
                        value,
                        create_revision: self.revision,
                        mod_revision: self.revision,
                        version: 1,
                        lease,
                    },
                };

                if let Some(lease) = lease.and_then(|id| self.leases.get_mut(&id)) {
                    lease.keys.insert(key.clone());
                }
                self.kvs.insert(key, kv);

                ResponseOp::Put
            }
            RequestOp::Range { key } => ResponseOp::Range {
                kvs: self.kvs.get(&key).cloned().into_iter().collect(),
            },
            RequestOp::DeleteRange { key } => {
                let deleted = self.kvs.remove(&key).map_or(0, |existing| {
                    self.detach(&existing);
                    1
                });

                ResponseOp::DeleteRange { deleted }
            }
        }
    }

    fn detach(&mut self, kv: &KeyValue) {
        if let Some(lease) = kv.lease.and_then(|id| self.leases.get_mut(&id)) {
            lease.keys.remove(&kv.key);
        }
    }

    pub fn lease_grant(&mut self, user: &str, ttl: i64) -> Result<Lease> {
        self.authenticate(user)?;

        let seconds = u64::try_from(ttl)
            .ok()
            .filter(|seconds| *seconds > 0)
            .ok_or_else(|| Error::InvalidArgument(format!("lease TTL must be positive, got {ttl}")))?;

        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(seconds))
            .ok_or_else(|| Error::InvalidArgument(format!("lease TTL {ttl} is too large")))?;

        let id = self.next_lease_id;
        self.next_lease_id += 1;
        self.leases.insert(
            id,
            LeaseState {
                expires_at,
                keys: BTreeSet::new(),
            },
        );

        Ok(Lease { id, ttl })
    }

    pub fn lease_revoke(&mut self, user: &str, id: LeaseId) -> Result<()> {
        let lease = self
            .leases
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("lease {id}")))?;

        self.authenticate(user)?;
        for key in &lease.keys {
            self.authorize_key(user, key, Access::Write)?;
        }

        self.drop_lease(id);

        Ok(())
    }

    pub fn auth_status(&self, user: &str) -> Result<AuthStatus> {
        self.authenticate(user)?;

        Ok(AuthStatus {
            enabled: self.auth_enabled,
        })
    }

    pub fn role_add(&mut self, user: &str, name: &str) -> Result<()> {
        self.authorize_admin(user)?;

        if name.is_empty() {
            return Err(Error::InvalidArgument("empty role name".to_string()));
        }
        if self.roles.contains_key(name) {
            return Err(Error::AlreadyExists(format!("role {name:?}")));
        }

        self.roles.insert(name.to_string(), Vec::new());

        Ok(())
    }

    pub fn role_grant_permission(
        &mut self,
        user: &str,
        role: &str,
        permission: Permission,
    ) -> Result<()> {
        self.authorize_admin(user)?;

        let permissions = self
            .roles
            .get_mut(role)
            .ok_or_else(|| Error::NotFound(format!("role {role:?}")))?;

        match permissions
            .iter_mut()
            .find(|existing| existing.key == permission.key && existing.range_end == permission.range_end)
        {
            Some(existing) => existing.perm_type = permission.perm_type,
            None => permissions.push(permission),
        }

        Ok(())
    }

    pub fn user_add(&mut self, user: &str, name: &str) -> Result<()> {
        self.authorize_admin(user)?;

        if name.is_empty() {
            return Err(Error::InvalidArgument("empty user name".to_string()));
        }
        if self.users.contains_key(name) {
            return Err(Error::AlreadyExists(format!("user {name:?}")));
        }

        self.users.insert(name.to_string(), BTreeSet::new());

        Ok(())
    }

    pub fn user_grant_role(&mut self, user: &str, name: &str, role: &str) -> Result<()> {
        self.authorize_admin(user)?;

        if !self.roles.contains_key(role) {
            return Err(Error::NotFound(format!("role {role:?}")));
        }

        self.users
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("user {name:?}")))?
            .insert(role.to_string());

        Ok(())
    }

    pub fn auth_enable(&mut self, user: &str) -> Result<()> {
        if self.auth_enabled {
            return self.authenticate(user);
        }

        match self.users.get(ROOT) {
            Some(roles) if roles.contains(ROOT) => {}
            Some(_) => {
                return Err(Error::InvalidArgument(
                    "root user does not hold the root role".to_string(),
                ));
            }
            None => {
                return Err(Error::InvalidArgument("root user does not exist".to_string()));
            }
        }

        self.auth_enabled = true;

        Ok(())
    }

    /// Names the registered member advertising one of the configured peer
    /// URLs after its server started, returning the member ID.
    pub fn attach_member(&mut self, config: &ServerConfig) -> Result<u64> {
        let member = self
            .members
            .iter_mut()
            .find(|member| {
                member
                    .peer_urls
                    .iter()
                    .any(|url| config.advertise_peer_urls.contains(url))
            })
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "member advertising {:?}",
                    config
                        .advertise_peer_urls
                        .iter()
                        .map(Url::as_str)
                        .collect::<Vec<_>>()
                ))
            })?;

        member.name.clone_from(&config.name);
        member.client_urls.clone_from(&config.advertise_client_urls);

        Ok(member.id)
    }

    pub fn has_member(&self, id: u64) -> bool {
        self.members.iter().any(|member| member.id == id)
    }

    pub fn member_list(&self, user: &str) -> Result<Vec<Member>> {
        self.authorize_admin(user)?;

        Ok(self.members.clone())
    }

    pub fn member_add(&mut self, user: &str, peer_urls: Vec<Url>) -> Result<Member> {
        self.authorize_admin(user)?;

        if peer_urls.is_empty() {
            return Err(Error::InvalidArgument("member without peer URLs".to_string()));
        }
        if let Some(url) = peer_urls.iter().find(|url| {
            self.members
                .iter()
                .any(|member| member.peer_urls.contains(url))
        }) {
            return Err(Error::AlreadyExists(format!("member with peer URL {url}")));
        }

        let member = Member {
            id: new_member_id(&self.members),
            name: String::new(),
            peer_urls,
            client_urls: Vec::new(),
        };
        self.members.push(member.clone());

        Ok(member)
    }

    pub fn member_remove(&mut self, user: &str, id: u64) -> Result<Vec<Member>> {
        self.authorize_admin(user)?;

        let position = self
            .members
            .iter()
            .position(|member| member.id == id)
            .ok_or_else(|| Error::NotFound(format!("member {id:x}")))?;
        self.members.remove(position);

        Ok(self.members.clone())
    }
}

/// A random member ID not used by any of `members`.
pub fn new_member_id(members: &[Member]) -> u64 {
    loop {
        let id = rand::random::<u64>();
        if id != 0 && members.iter().all(|member| member.id != id) {
            return id;
        }
    }
}
