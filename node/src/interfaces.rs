//! Fetching the contract interfaces a transaction needs.

use crate::abi::{Abi, AbiDef, AbiError};
use crate::chain::ChainError;
use crate::config::AbiCacheConfig;
use cosigner_primitives::transaction::Action;
use cosigner_primitives::Name;
use futures::future::try_join_all;
use itertools::Itertools;
use lru::LruCache;
#[cfg(test)]
use mockall::automock;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Interfaces of every account a transaction touches.
pub type Interfaces = BTreeMap<Name, Abi>;

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("could not fetch the interface of {account}: {source}")]
    Unreachable {
        account: Name,
        #[source]
        source: ChainError,
    },
    #[error("account {0} has no interface")]
    NoInterface(Name),
    #[error("interface of {account} is unusable: {source}")]
    Invalid {
        account: Name,
        #[source]
        source: AbiError,
    },
}

impl ResolutionError {
    pub fn account(&self) -> Name {
        match self {
            ResolutionError::Unreachable { account, .. }
            | ResolutionError::Invalid { account, .. } => *account,
            ResolutionError::NoInterface(account) => *account,
        }
    }
}

/// Source of contract interfaces.
#[cfg_attr(test, automock)]
pub trait AbiProvider {
    /// `Ok(None)` means the account exists but publishes no interface.
    fn get_abi(
        &self,
        account: Name,
    ) -> impl Future<Output = Result<Option<AbiDef>, ChainError>> + Send;
}

/// Fetches the interface of each distinct account in `actions`, concurrently
/// and at most once per account. Any account without a usable interface
/// fails the whole lookup.
pub async fn resolve_interfaces<'a, P>(
    provider: &P,
    actions: impl IntoIterator<Item = &'a Action>,
) -> Result<Interfaces, ResolutionError>
where
    P: AbiProvider + Sync,
{
    let accounts: Vec<Name> = actions
        .into_iter()
        .map(|action| action.account)
        .unique()
        .collect();
    let fetched = try_join_all(accounts.into_iter().map(|account| async move {
        let def = provider
            .get_abi(account)
            .await
            .map_err(|source| ResolutionError::Unreachable { account, source })?
            .ok_or(ResolutionError::NoInterface(account))?;
        let abi = Abi::new(def).map_err(|source| ResolutionError::Invalid { account, source })?;
        Ok::<_, ResolutionError>((account, abi))
    }))
    .await?;
    Ok(fetched.into_iter().collect())
}

struct CachedAbi {
    fetched_at: Instant,
    abi: AbiDef,
}

/// Keeps recently fetched interfaces in front of another provider.
///
/// Entries expire `ttl` after they were fetched, so a contract update is
/// picked up within that window. Accounts without an interface and failed
/// lookups are never cached.
pub struct CachingAbiProvider<P> {
    inner: P,
    ttl: Duration,
    cache: Mutex<LruCache<Name, CachedAbi>>,
}

impl<P> CachingAbiProvider<P> {
    pub fn new(inner: P, config: &AbiCacheConfig) -> Self {
        Self {
            inner,
            ttl: Duration::from_secs(config.ttl_sec),
            cache: Mutex::new(LruCache::new(config.capacity)),
        }
    }

    fn lookup(&self, account: Name) -> Option<AbiDef> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        match cache.get(&account) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => Some(entry.abi.clone()),
            Some(_) => {
                cache.pop(&account);
                None
            }
            None => None,
        }
    }

    fn store(&self, account: Name, abi: AbiDef) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(
                account,
                CachedAbi {
                    fetched_at: Instant::now(),
                    abi,
                },
            );
    }

    /// Drops the cached interface of `account`, if any.
    pub fn invalidate(&self, account: Name) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(&account);
    }
}

impl<P> AbiProvider for CachingAbiProvider<P>
where
    P: AbiProvider + Sync + Send,
{
    async fn get_abi(&self, account: Name) -> Result<Option<AbiDef>, ChainError> {
        if let Some(abi) = self.lookup(account) {
            tracing::trace!(target: "cosigner", %account, "interface served from cache");
            return Ok(Some(abi));
        }
        let fetched = self.inner.get_abi(account).await?;
        if let Some(abi) = &fetched {
            self.store(account, abi.clone());
        }
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::testing::{noop_abi, token_abi};
    use crate::esr::testing::name;
    use assert_matches::assert_matches;
    use cosigner_primitives::transaction::PermissionLevel;
    use mockall::predicate::eq;
    use std::num::NonZeroUsize;

    fn action(account: &str, action_name: &str) -> Action {
        Action {
            account: name(account),
            name: name(action_name),
            authorization: vec![PermissionLevel {
                actor: name("alice"),
                permission: name("active"),
            }],
            data: Vec::new(),
        }
    }

    fn cache_config(ttl_sec: u64) -> AbiCacheConfig {
        AbiCacheConfig {
            capacity: NonZeroUsize::new(8).unwrap(),
            ttl_sec,
        }
    }

    fn rejected() -> ChainError {
        ChainError::InvalidResponse {
            endpoint: "v1/chain/get_abi",
            reason: "unreachable".to_string(),
        }
    }

    #[tokio::test]
    async fn test_each_account_is_fetched_once() {
        let mut provider = MockAbiProvider::new();
        provider
            .expect_get_abi()
            .with(eq(name("eosio.token")))
            .times(1)
            .returning(|_| Box::pin(async { Ok(Some(token_abi())) }));
        provider
            .expect_get_abi()
            .with(eq(name("cosigner")))
            .times(1)
            .returning(|_| Box::pin(async { Ok(Some(noop_abi())) }));

        let actions = [
            action("eosio.token", "transfer"),
            action("cosigner", "noop"),
            action("eosio.token", "transfer"),
            action("eosio.token", "open"),
        ];
        let interfaces = resolve_interfaces(&provider, &actions).await.unwrap();
        assert_eq!(
            interfaces.keys().copied().collect::<Vec<_>>(),
            vec![name("cosigner"), name("eosio.token")]
        );
    }

    #[tokio::test]
    async fn test_missing_interface_fails_resolution() {
        let mut provider = MockAbiProvider::new();
        provider
            .expect_get_abi()
            .with(eq(name("eosio.token")))
            .returning(|_| Box::pin(async { Ok(Some(token_abi())) }));
        provider
            .expect_get_abi()
            .with(eq(name("alice")))
            .returning(|_| Box::pin(async { Ok(None) }));

        let actions = [action("eosio.token", "transfer"), action("alice", "hi")];
        let error = resolve_interfaces(&provider, &actions).await.unwrap_err();
        assert_matches!(error, ResolutionError::NoInterface(account) if account == name("alice"));
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_resolution() {
        let mut provider = MockAbiProvider::new();
        provider
            .expect_get_abi()
            .returning(|_| Box::pin(async { Err(rejected()) }));
        let error = resolve_interfaces(&provider, &[action("eosio.token", "transfer")])
            .await
            .unwrap_err();
        assert_matches!(error, ResolutionError::Unreachable { .. });
        assert_eq!(error.account(), name("eosio.token"));
    }

    #[tokio::test]
    async fn test_invalid_interface_fails_resolution() {
        let mut def = token_abi();
        def.structs.push(def.structs[0].clone());
        let mut provider = MockAbiProvider::new();
        provider.expect_get_abi().returning(move |_| {
            let def = def.clone();
            Box::pin(async move { Ok(Some(def)) })
        });
        assert_matches!(
            resolve_interfaces(&provider, &[action("eosio.token", "transfer")]).await,
            Err(ResolutionError::Invalid { .. })
        );
    }

    #[tokio::test]
    async fn test_no_actions_needs_no_interfaces() {
        let provider = MockAbiProvider::new();
        let interfaces = resolve_interfaces(&provider, &[]).await.unwrap();
        assert!(interfaces.is_empty());
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_lookups() {
        let mut inner = MockAbiProvider::new();
        inner
            .expect_get_abi()
            .times(1)
            .returning(|_| Box::pin(async { Ok(Some(token_abi())) }));
        let provider = CachingAbiProvider::new(inner, &cache_config(60));

        for _ in 0..3 {
            let abi = provider.get_abi(name("eosio.token")).await.unwrap();
            assert_eq!(abi, Some(token_abi()));
        }
    }

    #[tokio::test]
    async fn test_cache_expires_and_invalidates() {
        let mut inner = MockAbiProvider::new();
        inner
            .expect_get_abi()
            .times(2)
            .returning(|_| Box::pin(async { Ok(Some(token_abi())) }));
        let provider = CachingAbiProvider::new(inner, &cache_config(0));
        provider.get_abi(name("eosio.token")).await.unwrap();
        provider.get_abi(name("eosio.token")).await.unwrap();

        let mut inner = MockAbiProvider::new();
        inner
            .expect_get_abi()
            .times(2)
            .returning(|_| Box::pin(async { Ok(Some(token_abi())) }));
        let provider = CachingAbiProvider::new(inner, &cache_config(60));
        provider.get_abi(name("eosio.token")).await.unwrap();
        provider.invalidate(name("eosio.token"));
        provider.get_abi(name("eosio.token")).await.unwrap();
    }

    #[tokio::test]
    async fn test_cache_skips_empty_and_failed_lookups() {
        let mut inner = MockAbiProvider::new();
        inner
            .expect_get_abi()
            .with(eq(name("alice")))
            .times(2)
            .returning(|_| Box::pin(async { Ok(None) }));
        inner
            .expect_get_abi()
            .with(eq(name("bob")))
            .times(2)
            .returning(|_| Box::pin(async { Err(rejected()) }));
        let provider = CachingAbiProvider::new(inner, &cache_config(60));
        for _ in 0..2 {
            assert_eq!(provider.get_abi(name("alice")).await.unwrap(), None);
            assert!(provider.get_abi(name("bob")).await.is_err());
        }
    }
}
