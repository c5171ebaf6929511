//! The `russh::client::Handler` implementation and its host-key policy.

/// Accepts any host key. This is a deliberate simplification documented
/// loudly: deployments that require verification wrap session construction
/// with a strict policy of their own.
pub struct ClientHandler;

#[async_trait::async_trait]
impl russh::client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}
