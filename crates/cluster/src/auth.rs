use crate::error::{Error, Result};

use secret_kv::{
    KvError, KvErrorKind, KvServer, LocalAuthContext, Permission, PermissionType, ROOT,
    UserAddOptions,
};
use tracing::{debug, info};

/// Key prefix every secret is stored under.
pub const SECRET_PREFIX: &str = "inference-secrets/";

/// User and role name of clients reading secrets. Client certificates carry
/// this as their common name.
pub const CLIENT_PRINCIPAL: &str = "secret-service-client";

/// Configures certificate-based access control on a freshly started store.
///
/// Creates a role that may read every key under [`SECRET_PREFIX`], the users
/// `root` and [`CLIENT_PRINCIPAL`] without password login, grants each the
/// role of the same name and enables authorization. Nothing is changed if
/// authorization is already enabled. Roles and users left behind by an
/// interrupted earlier run are reused, so a bootstrap that failed halfway
/// completes on the next launch.
pub struct AuthBootstrapper<'a, S> {
    server: &'a S,
    ctx: &'a LocalAuthContext,
}

impl<'a, S> AuthBootstrapper<'a, S>
where
    S: KvServer,
{
    /// Creates a bootstrapper acting as `ctx` on `server`.
    pub const fn new(server: &'a S, ctx: &'a LocalAuthContext) -> Self {
        Self { server, ctx }
    }

    /// Runs the bootstrap.
    ///
    /// # Errors
    ///
    /// Returns the first request that fails. No rollback is attempted.
    pub async fn run(&self) -> Result<(), S::Error> {
        let status = self
            .server
            .auth_status(self.ctx)
            .await
            .map_err(|e| Error::Kv("checking auth status", e))?;

        if status.enabled {
            debug!("authorization already enabled");
            return Ok(());
        }

        info!("configuring authorization");

        create_or_get(
            self.server.role_add(self.ctx, CLIENT_PRINCIPAL).await,
            "adding client role",
        )?;

        self.server
            .role_grant_permission(
                self.ctx,
                CLIENT_PRINCIPAL,
                Permission::prefix(SECRET_PREFIX, PermissionType::Read),
            )
            .await
            .map_err(|e| Error::Kv("granting permission to client role", e))?;

        for user in [ROOT, CLIENT_PRINCIPAL] {
            create_or_get(
                self.server
                    .user_add(self.ctx, user, UserAddOptions { no_password: true })
                    .await,
                "adding user",
            )?;

            // Roles are named after their users.
            self.server
                .user_grant_role(self.ctx, user, user)
                .await
                .map_err(|e| Error::Kv("granting role to user", e))?;
        }

        self.server
            .auth_enable(self.ctx)
            .await
            .map_err(|e| Error::Kv("enabling authorization", e))?;

        info!("authorization enabled");

        Ok(())
    }
}

fn create_or_get<KE>(result: std::result::Result<(), KE>, context: &'static str) -> Result<(), KE>
where
    KE: KvError,
{
    match result {
        Err(error) if error.kind() == KvErrorKind::AlreadyExists => {
            debug!(%error, "{context}: reusing existing entry");
            Ok(())
        }
        result => result.map_err(|e| Error::Kv(context, e)),
    }
}
