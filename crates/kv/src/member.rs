use url::Url;

/// A member of the store's consensus group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Member {
    /// Cluster-assigned member ID.
    pub id: u64,

    /// Member name. Empty until the member has been started.
    pub name: String,

    /// URLs other members replicate to.
    pub peer_urls: Vec<Url>,

    /// URLs clients connect to. Empty until the member has been started.
    pub client_urls: Vec<Url>,
}

impl Member {
    /// Whether the member has been registered but never started.
    #[must_use]
    pub fn is_unstarted(&self) -> bool {
        self.name.is_empty()
    }
}
