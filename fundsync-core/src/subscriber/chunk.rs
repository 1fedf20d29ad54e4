//! Bulk reads sized for the remote's per-call limits.

use crate::events::LoadedAccount;
use crate::schema::AccountKind;
use futures_util::future::try_join_all;
use fundsync_sdk::Pubkey;
use fundsync_sdk::rpc::{AccountRpc, KeyedAccount, MAX_MULTIPLE_ACCOUNTS, RpcError, RpcResponse};

/// Fetch any number of accounts in concurrent batches of at most
/// [`MAX_MULTIPLE_ACCOUNTS`].
///
/// The result has one entry per requested address, in request order. If
/// any batch fails the whole read fails.
pub async fn get_multiple_chunked(
    rpc: &dyn AccountRpc,
    addresses: &[Pubkey],
) -> Result<Vec<LoadedAccount>, RpcError> {
    if addresses.is_empty() {
        return Ok(Vec::new());
    }

    let responses = try_join_all(
        addresses
            .chunks(MAX_MULTIPLE_ACCOUNTS)
            .map(|chunk| rpc.get_multiple_accounts(chunk)),
    )
    .await?;

    let mut loaded = Vec::with_capacity(addresses.len());
    for (chunk, response) in addresses.chunks(MAX_MULTIPLE_ACCOUNTS).zip(responses) {
        if response.value.len() != chunk.len() {
            return Err(RpcError::InvalidResponse(format!(
                "requested {} accounts, got {}",
                chunk.len(),
                response.value.len()
            )));
        }
        let slot = response.slot;
        loaded.extend(
            chunk
                .iter()
                .zip(response.value)
                .map(|(address, account)| LoadedAccount {
                    address: *address,
                    slot,
                    data: account.map(|a| a.data),
                }),
        );
    }
    Ok(loaded)
}

/// Scan every program account tagged as `kind`.
///
/// The tag is filtered server side and checked again here.
pub async fn scan_kind<K: AccountKind>(
    rpc: &dyn AccountRpc,
    program_id: &Pubkey,
    kind: K,
) -> Result<RpcResponse<Vec<KeyedAccount>>, RpcError> {
    let mut response = rpc.get_program_accounts(program_id, &[kind.filter()]).await?;
    let tag = kind.discriminator();
    response
        .value
        .retain(|keyed| tag.matches(&keyed.account.data));
    tracing::debug!(%kind, found = response.value.len(), "program scan");
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DriftAccountKind;
    use crate::testing::{MockRpc, depositor_data, key};

    #[tokio::test]
    async fn test_250_addresses_take_three_calls() {
        let rpc = MockRpc::new();
        let addresses: Vec<Pubkey> = (0..250u32).map(key).collect();
        for address in addresses.iter().step_by(2) {
            rpc.put(*address, depositor_data(address, 1));
        }

        let loaded = get_multiple_chunked(rpc.as_ref(), &addresses).await.unwrap();
        let mut sizes = rpc.multi_call_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![52, 99, 99]);

        assert_eq!(loaded.len(), 250);
        for (i, entry) in loaded.iter().enumerate() {
            assert_eq!(entry.address, addresses[i]);
            assert_eq!(entry.data.is_some(), i % 2 == 0);
        }
    }

    #[tokio::test]
    async fn test_one_failed_chunk_fails_the_read() {
        let rpc = MockRpc::new();
        let addresses: Vec<Pubkey> = (0..150u32).map(key).collect();
        rpc.fail_on(addresses[120]);
        let err = get_multiple_chunked(rpc.as_ref(), &addresses).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn test_scan_rechecks_tag() {
        let rpc = MockRpc::new();
        let a = key(1);
        let b = key(2);
        rpc.put(a, depositor_data(&a, 1));
        rpc.put(b, vec![9u8; 4]);
        let program = MockRpc::program_id();
        let scanned = scan_kind(rpc.as_ref(), &program, DriftAccountKind::VaultDepositor)
            .await
            .unwrap();
        assert_eq!(scanned.value.len(), 1);
        assert_eq!(scanned.value[0].address, a);
    }
}
