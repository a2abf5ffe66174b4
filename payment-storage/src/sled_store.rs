// payment-storage: repository traits and storage backends for payment-kit.

//! Embedded, durable, single-writer backend over `sled`. Schema-versioned
//! composite keys stand in for spec's "browser local storage" back-end,
//! grounded on the retrieval pack's dedicated sled storage-provider crate
//! rather than a literal browser API binding.

use async_trait::async_trait;
use chrono::Utc;
use sled::Tree;
use subrav_codec::{CanonicalDecode, CanonicalEncode, ChannelId, SignedSubRav};

use crate::error::Error;
use crate::models::*;
use crate::traits::{ChannelRepository, PendingSubRavRepository, RavRepository};

const SCHEMA_VERSION: u8 = 1;

fn sub_channel_key(channel_id: &ChannelId, vm_id_fragment: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32 + vm_id_fragment.len());
    key.push(SCHEMA_VERSION);
    key.extend_from_slice(channel_id.as_bytes());
    key.push(0); // separator; vmIdFragment length is not fixed so this avoids ambiguity.
    key.extend_from_slice(vm_id_fragment.as_bytes());
    key
}

fn rav_key(channel_id: &ChannelId, vm_id_fragment: &str, nonce: u64) -> Vec<u8> {
    let mut key = sub_channel_key(channel_id, vm_id_fragment);
    key.extend_from_slice(&nonce.to_be_bytes());
    key
}

/// A sled-backed [`ChannelRepository`].
///
/// Channels live in one `Tree` keyed by raw channel id bytes; sub-channel
/// cursors in a second `Tree` keyed by [`sub_channel_key`], so the two
/// entity spaces never collide even though both embed a `ChannelId` prefix.
pub struct SledChannelRepository {
    channels: Tree,
    sub_channels: Tree,
}

impl SledChannelRepository {
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        Ok(SledChannelRepository {
            channels: db.open_tree("channels_v1")?,
            sub_channels: db.open_tree("sub_channels_v1")?,
        })
    }
}

fn encode_channel_info(info: &ChannelInfo) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(SCHEMA_VERSION);
    buf.extend_from_slice(info.channel_id.as_bytes());
    buf.extend(info.payer_did.canonical_serialize());
    buf.extend(info.payee_did.canonical_serialize());
    buf.extend(info.asset_id.canonical_serialize());
    buf.extend(info.chain_id.canonical_serialize());
    buf.extend(info.epoch.canonical_serialize());
    buf.push(match info.status {
        ChannelStatus::Active => 0,
        ChannelStatus::Closing => 1,
        ChannelStatus::Closed => 2,
    });
    buf
}

fn decode_channel_info(bytes: &[u8]) -> Result<ChannelInfo, Error> {
    use std::io::Read;
    let mut cursor = std::io::Cursor::new(bytes);
    let mut version = [0u8; 1];
    cursor.read_exact(&mut version).map_err(|e| Error::backend(e.to_string()))?;
    let mut channel_id_bytes = [0u8; 32];
    cursor
        .read_exact(&mut channel_id_bytes)
        .map_err(|e| Error::backend(e.to_string()))?;
    let payer_did = String::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let payee_did = String::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let asset_id = String::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let chain_id = u64::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let epoch = u64::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let mut status_byte = [0u8; 1];
    cursor
        .read_exact(&mut status_byte)
        .map_err(|e| Error::backend(e.to_string()))?;
    let status = match status_byte[0] {
        0 => ChannelStatus::Active,
        1 => ChannelStatus::Closing,
        _ => ChannelStatus::Closed,
    };
    Ok(ChannelInfo {
        channel_id: ChannelId::from_bytes(channel_id_bytes),
        payer_did,
        payee_did,
        asset_id,
        chain_id,
        epoch,
        status,
    })
}

#[async_trait]
impl ChannelRepository for SledChannelRepository {
    async fn get_channel(&self, channel_id: &ChannelId) -> Result<Option<ChannelInfo>, Error> {
        match self.channels.get(channel_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_channel_info(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_channel(&self, info: ChannelInfo) -> Result<(), Error> {
        self.channels.insert(info.channel_id.as_bytes(), encode_channel_info(&info))?;
        Ok(())
    }

    async fn remove_channel(&self, channel_id: &ChannelId) -> Result<(), Error> {
        self.channels.remove(channel_id.as_bytes())?;
        Ok(())
    }

    async fn list_channels(&self, filter: &ChannelFilter, page: Pagination) -> Result<Vec<ChannelInfo>, Error> {
        let mut out = Vec::new();
        for item in self.channels.iter() {
            let (_, bytes) = item?;
            let info = decode_channel_info(&bytes)?;
            let keep = filter.payer_did.as_deref().map_or(true, |d| d == info.payer_did)
                && filter.payee_did.as_deref().map_or(true, |d| d == info.payee_did)
                && filter.status.map_or(true, |s| s == info.status)
                && filter.asset_id.as_deref().map_or(true, |a| a == info.asset_id);
            if keep {
                out.push(info);
            }
        }
        Ok(out.into_iter().skip(page.offset as usize).take(page.limit as usize).collect())
    }

    async fn get_sub_channel(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
    ) -> Result<Option<SubChannelInfo>, Error> {
        let key = sub_channel_key(channel_id, vm_id_fragment);
        match self.sub_channels.get(&key)? {
            Some(bytes) => Ok(Some(decode_sub_channel(channel_id, vm_id_fragment, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn update_sub_channel(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
        update: SubChannelCursorUpdate,
    ) -> Result<SubChannelInfo, Error> {
        let key = sub_channel_key(channel_id, vm_id_fragment);
        let mut current = match self.sub_channels.get(&key)? {
            Some(bytes) => decode_sub_channel(channel_id, vm_id_fragment, &bytes)?,
            None => SubChannelInfo {
                channel_id: *channel_id,
                epoch: 0,
                vm_id_fragment: vm_id_fragment.to_string(),
                last_claimed_amount: subrav_codec::Amount::ZERO,
                last_confirmed_nonce: 0,
                last_updated: Utc::now(),
            },
        };
        if let Some(epoch) = update.epoch {
            current.epoch = epoch;
        }
        if let Some(amount) = update.last_claimed_amount {
            current.last_claimed_amount = amount;
        }
        if let Some(nonce) = update.last_confirmed_nonce {
            current.last_confirmed_nonce = nonce;
        }
        current.last_updated = Utc::now();
        self.sub_channels.insert(key, encode_sub_channel(&current))?;
        Ok(current)
    }

    async fn remove_sub_channel(&self, channel_id: &ChannelId, vm_id_fragment: &str) -> Result<(), Error> {
        self.sub_channels.remove(sub_channel_key(channel_id, vm_id_fragment))?;
        Ok(())
    }

    async fn list_sub_channels(&self, channel_id: &ChannelId) -> Result<Vec<SubChannelInfo>, Error> {
        let mut prefix = vec![SCHEMA_VERSION];
        prefix.extend_from_slice(channel_id.as_bytes());
        let mut out = Vec::new();
        for item in self.sub_channels.scan_prefix(prefix) {
            let (key, bytes) = item?;
            // vmIdFragment is everything after the `[version][channelId][0x00]` prefix.
            let fragment = String::from_utf8_lossy(&key[34..]).to_string();
            out.push(decode_sub_channel(channel_id, &fragment, &bytes)?);
        }
        Ok(out)
    }

    async fn stats(&self) -> Result<ChannelRepositoryStats, Error> {
        Ok(ChannelRepositoryStats {
            channel_count: self.channels.len() as u64,
            sub_channel_count: self.sub_channels.len() as u64,
        })
    }
}

fn encode_sub_channel(info: &SubChannelInfo) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend(info.epoch.canonical_serialize());
    buf.extend(info.last_claimed_amount.canonical_serialize());
    buf.extend(info.last_confirmed_nonce.canonical_serialize());
    buf.extend((info.last_updated.timestamp_millis() as u64).canonical_serialize());
    buf
}

fn decode_sub_channel(channel_id: &ChannelId, vm_id_fragment: &str, bytes: &[u8]) -> Result<SubChannelInfo, Error> {
    let mut cursor = std::io::Cursor::new(bytes);
    let epoch = u64::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let last_claimed_amount =
        subrav_codec::Amount::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let last_confirmed_nonce = u64::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let millis = u64::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let last_updated = chrono::DateTime::from_timestamp_millis(millis as i64)
        .unwrap_or_else(Utc::now);
    Ok(SubChannelInfo {
        channel_id: *channel_id,
        epoch,
        vm_id_fragment: vm_id_fragment.to_string(),
        last_claimed_amount,
        last_confirmed_nonce,
        last_updated,
    })
}

/// A sled-backed append-only [`RavRepository`].
pub struct SledRavRepository {
    ravs: Tree,
    claimed: Tree,
}

impl SledRavRepository {
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        Ok(SledRavRepository {
            ravs: db.open_tree("ravs_v1")?,
            claimed: db.open_tree("claim_cursors_v1")?,
        })
    }
}

#[async_trait]
impl RavRepository for SledRavRepository {
    async fn save(&self, rav: SignedSubRav) -> Result<(), Error> {
        let key = rav_key(&rav.sub_rav.channel_id, &rav.sub_rav.vm_id_fragment, rav.sub_rav.nonce);
        if self.ravs.get(&key)?.is_none() {
            self.ravs.insert(key, rav.canonical_serialize())?;
        }
        Ok(())
    }

    async fn get_latest(&self, channel_id: &ChannelId, vm_id_fragment: &str) -> Result<Option<SignedSubRav>, Error> {
        let mut prefix = sub_channel_key(channel_id, vm_id_fragment);
        let mut best: Option<SignedSubRav> = None;
        for item in self.ravs.scan_prefix(&prefix) {
            let (_, bytes) = item?;
            let rav = SignedSubRav::canonical_deserialize(&bytes.to_vec()).map_err(|e| Error::backend(e.to_string()))?;
            if best.as_ref().map_or(true, |b| b.sub_rav.nonce < rav.sub_rav.nonce) {
                best = Some(rav);
            }
        }
        prefix.clear();
        Ok(best)
    }

    async fn list(&self, channel_id: &ChannelId) -> Result<Vec<SignedSubRav>, Error> {
        let mut prefix = vec![SCHEMA_VERSION];
        prefix.extend_from_slice(channel_id.as_bytes());
        let mut out = Vec::new();
        for item in self.ravs.scan_prefix(prefix) {
            let (_, bytes) = item?;
            out.push(SignedSubRav::canonical_deserialize(&bytes.to_vec()).map_err(|e| Error::backend(e.to_string()))?);
        }
        Ok(out)
    }

    async fn get_unclaimed_ravs(&self, channel_id: &ChannelId) -> Result<Vec<(String, SignedSubRav)>, Error> {
        let all = self.list(channel_id).await?;
        let mut best: std::collections::BTreeMap<String, SignedSubRav> = std::collections::BTreeMap::new();
        for rav in all {
            let claim_key = sub_channel_key(channel_id, &rav.sub_rav.vm_id_fragment);
            let claimed_nonce = self
                .claimed
                .get(&claim_key)?
                .map(|b| u64::from_be_bytes(b.as_ref().try_into().unwrap_or_default()))
                .unwrap_or(0);
            if rav.sub_rav.nonce <= claimed_nonce {
                continue;
            }
            let fragment = rav.sub_rav.vm_id_fragment.clone();
            let better = best.get(&fragment).map_or(true, |b| b.sub_rav.nonce < rav.sub_rav.nonce);
            if better {
                best.insert(fragment, rav);
            }
        }
        Ok(best.into_iter().collect())
    }

    async fn mark_as_claimed(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
        nonce: u64,
        _tx_hash: Option<String>,
    ) -> Result<(), Error> {
        let key = sub_channel_key(channel_id, vm_id_fragment);
        let current = self
            .claimed
            .get(&key)?
            .map(|b| u64::from_be_bytes(b.as_ref().try_into().unwrap_or_default()))
            .unwrap_or(0);
        if nonce < current {
            return Err(Error::NonMonotonicClaim { current, attempted: nonce });
        }
        self.claimed.insert(key, &nonce.to_be_bytes())?;
        Ok(())
    }

    async fn cleanup(&self, policy: RavCleanupPolicy) -> Result<u64, Error> {
        // The embedded backend tracks only the claim cursor per sub-channel,
        // not per-RAV timestamps, so age-based retention is approximated by
        // the claim-cursor and keep-latest rules (same caveat as the
        // in-memory backend).
        let mut removed = 0u64;
        let keys: Vec<_> = self.ravs.iter().keys().collect::<Result<_, _>>()?;
        let mut latest_per_sub_channel: std::collections::BTreeMap<Vec<u8>, u64> = std::collections::BTreeMap::new();
        if policy.keep_latest_per_sub_channel {
            for key in &keys {
                let nonce = u64::from_be_bytes(key[key.len() - 8..].try_into().unwrap());
                let prefix = key[..key.len() - 8].to_vec();
                let entry = latest_per_sub_channel.entry(prefix).or_insert(0);
                if nonce > *entry {
                    *entry = nonce;
                }
            }
        }
        for key in keys {
            let nonce = u64::from_be_bytes(key[key.len() - 8..].try_into().unwrap());
            let claim_key = key[..key.len() - 8].to_vec();
            let claimed_nonce = self
                .claimed
                .get(&claim_key)?
                .map(|b| u64::from_be_bytes(b.as_ref().try_into().unwrap_or_default()))
                .unwrap_or(0);
            if nonce > claimed_nonce {
                continue;
            }
            if policy.keep_latest_per_sub_channel {
                let latest = latest_per_sub_channel.get(&claim_key).copied().unwrap_or(0);
                if nonce == latest {
                    continue;
                }
            }
            self.ravs.remove(&key)?;
            removed += 1;
        }
        Ok(removed)
    }
}

fn pending_key(channel_id: &ChannelId, vm_id_fragment: &str, nonce: u64) -> Vec<u8> {
    rav_key(channel_id, vm_id_fragment, nonce)
}

/// A sled-backed [`PendingSubRavRepository`]. `created_at` is stored
/// alongside the encoded proposal so `cleanup` can use storage-local time,
/// as spec §4.4.3 requires.
pub struct SledPendingSubRavRepository {
    pending: Tree,
}

impl SledPendingSubRavRepository {
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        Ok(SledPendingSubRavRepository { pending: db.open_tree("pending_ravs_v1")? })
    }
}

fn encode_pending(pending: &PendingSubRav) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend((pending.created_at.timestamp_millis() as u64).canonical_serialize());
    buf.extend(pending.sub_rav.canonical_serialize());
    buf
}

fn decode_pending(bytes: &[u8]) -> Result<PendingSubRav, Error> {
    let mut cursor = std::io::Cursor::new(bytes);
    let millis = u64::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let sub_rav = subrav_codec::SubRav::canonical_decode(&mut cursor).map_err(|e| Error::backend(e.to_string()))?;
    let created_at = chrono::DateTime::from_timestamp_millis(millis as i64).unwrap_or_else(Utc::now);
    Ok(PendingSubRav {
        channel_id: sub_rav.channel_id,
        vm_id_fragment: sub_rav.vm_id_fragment.clone(),
        nonce: sub_rav.nonce,
        sub_rav,
        created_at,
    })
}

#[async_trait]
impl PendingSubRavRepository for SledPendingSubRavRepository {
    async fn save(&self, pending: PendingSubRav) -> Result<(), Error> {
        let key = pending_key(&pending.channel_id, &pending.vm_id_fragment, pending.nonce);
        self.pending.insert(key, encode_pending(&pending))?;
        Ok(())
    }

    async fn find(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
        nonce: u64,
    ) -> Result<Option<PendingSubRav>, Error> {
        let key = pending_key(channel_id, vm_id_fragment, nonce);
        self.pending.get(&key)?.map(|b| decode_pending(&b)).transpose()
    }

    async fn find_latest_by_sub_channel(
        &self,
        channel_id: &ChannelId,
        vm_id_fragment: &str,
    ) -> Result<Option<PendingSubRav>, Error> {
        let prefix = sub_channel_key(channel_id, vm_id_fragment);
        let mut best: Option<PendingSubRav> = None;
        for item in self.pending.scan_prefix(prefix) {
            let (_, bytes) = item?;
            let pending = decode_pending(&bytes)?;
            if best.as_ref().map_or(true, |b| b.nonce < pending.nonce) {
                best = Some(pending);
            }
        }
        Ok(best)
    }

    async fn remove(&self, channel_id: &ChannelId, vm_id_fragment: &str, nonce: u64) -> Result<(), Error> {
        self.pending.remove(pending_key(channel_id, vm_id_fragment, nonce))?;
        Ok(())
    }

    async fn cleanup(&self, max_age_ms: u64) -> Result<u64, Error> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(max_age_ms as i64);
        let mut removed = 0u64;
        for item in self.pending.iter() {
            let (key, bytes) = item?;
            let pending = decode_pending(&bytes)?;
            if pending.created_at < cutoff {
                self.pending.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<PendingSubRavStats, Error> {
        Ok(PendingSubRavStats { pending_count: self.pending.len() as u64 })
    }
}
