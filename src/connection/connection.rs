use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::messaging::address::Address;


/// The state shared by all connections: the set of addresses and whether the connection is
///  currently connected, i.e. whether all of these addresses are bound.
#[derive(Debug, Default)]
pub struct ConnectionState {
    inner: Mutex<ConnectionStateInner>,
}

#[derive(Debug, Default)]
struct ConnectionStateInner {
    addresses: BTreeSet<Address>,
    connected: bool,
}


/// A [Connection] is a transport endpoint bound to zero or more [Address]es. This trait holds
///  the lifecycle logic that is the same for all transports and all directions (sender, receiver,
///  publisher, subscriber): implementations provide the [ConnectionState] and the
///  transport-specific primitives for binding and unbinding a single address.
///
/// All lifecycle operations are idempotent. Adding or removing addresses is possible at any time,
///  taking effect immediately if the connection is connected and on the next
///  [Connection::initialize_connection] otherwise.
#[async_trait]
pub trait Connection: Debug + Send + Sync + 'static {
    fn state(&self) -> &ConnectionState;

    /// transport specific: bind or connect a single address
    async fn socket_add(&self, address: &Address) -> anyhow::Result<()>;
    /// transport specific: unbind or disconnect a single address
    async fn socket_remove(&self, address: &Address) -> anyhow::Result<()>;

    async fn add_address(&self, address: Address) -> anyhow::Result<()> {
        let mut state = self.state().inner.lock().await;
        if state.addresses.contains(&address) {
            return Ok(());
        }
        if state.connected {
            self.socket_add(&address).await?;
        }
        debug!(?address, "added address");
        state.addresses.insert(address);
        Ok(())
    }

    async fn remove_address(&self, address: &Address) -> anyhow::Result<()> {
        let mut state = self.state().inner.lock().await;
        if !state.addresses.contains(address) {
            return Ok(());
        }
        if state.connected {
            self.socket_remove(address).await?;
        }
        debug!(?address, "removed address");
        state.addresses.remove(address);
        Ok(())
    }

    async fn remove_all_addresses(&self) -> anyhow::Result<()> {
        let mut state = self.state().inner.lock().await;
        if state.connected {
            for address in &state.addresses {
                if let Err(e) = self.socket_remove(address).await {
                    warn!(?address, error = ?e, "error unbinding address - removing it anyway");
                }
            }
        }
        state.addresses.clear();
        Ok(())
    }

    /// Binds all addresses. If binding one of them fails, the ones bound so far are unbound
    ///  again and the connection stays disconnected.
    async fn initialize_connection(&self) -> anyhow::Result<()> {
        let mut state = self.state().inner.lock().await;
        if state.connected {
            return Ok(());
        }

        let mut bound = Vec::new();
        for address in &state.addresses {
            if let Err(e) = self.socket_add(address).await {
                for prev in bound {
                    if let Err(e) = self.socket_remove(prev).await {
                        warn!(address = ?prev, error = ?e, "error unbinding address after failed initialization");
                    }
                }
                return Err(e);
            }
            bound.push(address);
        }

        state.connected = true;
        debug!(addresses = ?state.addresses, "connection initialized");
        Ok(())
    }

    async fn terminate_connection(&self) -> anyhow::Result<()> {
        let mut state = self.state().inner.lock().await;
        if !state.connected {
            return Ok(());
        }

        for address in &state.addresses {
            if let Err(e) = self.socket_remove(address).await {
                warn!(?address, error = ?e, "error unbinding address during termination");
            }
        }
        state.connected = false;
        debug!(addresses = ?state.addresses, "connection terminated");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state().inner.lock().await
            .connected
    }

    async fn addresses(&self) -> Vec<Address> {
        self.state().inner.lock().await
            .addresses.iter()
            .cloned()
            .collect()
    }
}
