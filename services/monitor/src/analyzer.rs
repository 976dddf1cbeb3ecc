// Receipt analysis: swap-log identification, decoding, and arbitrage
// classification
use chainpulse_common::{MonitorError, Result};
use ethers::types::{Address, Log, Transaction, TransactionReceipt, H256, U256};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Canonical Uniswap-V2-style swap event:
/// `Swap(address indexed sender, uint256 amount0In, uint256 amount1In,
/// uint256 amount0Out, uint256 amount1Out, address indexed to)`
pub const SWAP_EVENT_SIGNATURE: &str = "Swap(address,uint256,uint256,uint256,uint256,address)";

/// topic-0 = keccak-256 of the signature string
/// (0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822)
pub static SWAP_TOPIC: Lazy<H256> = Lazy::new(|| H256::from(keccak256(SWAP_EVENT_SIGNATURE)));

/// Built-in swap-function selector allow-list. A transaction only qualifies
/// when its calldata starts with one of these.
const DEFAULT_SWAP_SELECTORS: &[([u8; 4], &str)] = &[
    ([0x38, 0xed, 0x17, 0x39], "swapExactTokensForTokens"),
    ([0x7f, 0xf3, 0x6a, 0xb5], "swapExactETHForTokens"),
    ([0x18, 0xcb, 0xaf, 0xe5], "swapExactTokensForETH"),
    (
        [0x5c, 0x11, 0xd7, 0x95],
        "swapExactTokensForTokensSupportingFeeOnTransferTokens",
    ),
    (
        [0xb6, 0xf9, 0xde, 0x95],
        "swapExactETHForTokensSupportingFeeOnTransferTokens",
    ),
    (
        [0x79, 0x1a, 0xc9, 0x47],
        "swapExactTokensForETHSupportingFeeOnTransferTokens",
    ),
    ([0xc0, 0x4b, 0x8d, 0x59], "exactInput"),
    ([0x41, 0x4b, 0xf3, 0x89], "exactInputSingle"),
    ([0xac, 0x96, 0x50, 0xd8], "multicall"),
    ([0x94, 0x5b, 0xce, 0xc9], "batchSwap"),
];

/// One decoded swap log. Transient: swaps live only long enough to drive
/// classification and profit reconstruction.
#[derive(Debug, Clone)]
pub struct SwapEvent {
    pub pool_address: String,
    pub sender: String,
    pub recipient: String,
    pub amount0_in: U256,
    pub amount1_in: U256,
    pub amount0_out: U256,
    pub amount1_out: U256,
    pub log_index: u64,
}

/// Classifies router-bound transactions and decodes their swap logs.
pub struct TxAnalyzer {
    routers: HashSet<String>,
    selectors: HashSet<[u8; 4]>,
}

impl TxAnalyzer {
    /// `routers` must already be normalized (lowercase, 0x-prefixed);
    /// `extra_selectors` extends the built-in allow-list with hex-encoded
    /// 4-byte selectors from configuration.
    pub fn new<'a>(
        routers: impl IntoIterator<Item = &'a String>,
        extra_selectors: &[String],
    ) -> Result<Self> {
        let mut selectors: HashSet<[u8; 4]> = DEFAULT_SWAP_SELECTORS
            .iter()
            .map(|(bytes, _)| *bytes)
            .collect();

        for raw in extra_selectors {
            let stripped = raw.strip_prefix("0x").unwrap_or(raw);
            let decoded = hex::decode(stripped)
                .map_err(|e| MonitorError::Config(format!("selector {}: {}", raw, e)))?;
            let bytes: [u8; 4] = decoded.try_into().map_err(|_| {
                MonitorError::Config(format!("selector {} is not 4 bytes", raw))
            })?;
            selectors.insert(bytes);
        }

        Ok(Self {
            routers: routers.into_iter().cloned().collect(),
            selectors,
        })
    }

    pub fn is_known_router(&self, to: &Address) -> bool {
        self.routers.contains(&address_to_string(to))
    }

    /// Arbitrage iff the recipient is a known router, the calldata selector
    /// is a recognized swap entry point, and the receipt holds at least two
    /// swap logs. Anything else is explicitly not-arbitrage.
    pub fn is_arbitrage(&self, tx: &Transaction, receipt: &TransactionReceipt) -> bool {
        let Some(to) = tx.to else {
            return false;
        };
        if !self.is_known_router(&to) {
            return false;
        }
        if !self.has_swap_selector(tx) {
            return false;
        }
        self.count_swaps(receipt) >= 2
    }

    fn has_swap_selector(&self, tx: &Transaction) -> bool {
        if tx.input.len() < 4 {
            return false;
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&tx.input[..4]);
        self.selectors.contains(&selector)
    }

    /// Number of logs whose topic-0 is exactly the canonical swap hash.
    /// Transfer/Sync/Approval/Mint/Burn entries never count.
    pub fn count_swaps(&self, receipt: &TransactionReceipt) -> usize {
        receipt
            .logs
            .iter()
            .filter(|log| is_swap_log(log))
            .count()
    }

    /// Decode every swap log of the receipt, ascending `log_index`.
    pub fn decode_swaps(&self, receipt: &TransactionReceipt) -> Result<Vec<SwapEvent>> {
        let mut swaps = Vec::new();

        for (position, log) in receipt.logs.iter().enumerate() {
            if !is_swap_log(log) {
                continue;
            }
            swaps.push(decode_swap_log(log, position as u64)?);
        }

        swaps.sort_by_key(|s| s.log_index);
        Ok(swaps)
    }
}

fn is_swap_log(log: &Log) -> bool {
    log.topics.first() == Some(&*SWAP_TOPIC)
}

fn decode_swap_log(log: &Log, position: u64) -> Result<SwapEvent> {
    if log.topics.len() < 3 {
        return Err(MonitorError::Decode(format!(
            "swap log at {:#x} has {} topics, expected 3",
            log.address,
            log.topics.len()
        )));
    }
    if log.data.len() < 128 {
        return Err(MonitorError::Decode(format!(
            "swap log at {:#x} has {} data bytes, expected 128",
            log.address,
            log.data.len()
        )));
    }

    // 4 x uint256 payload in declaration order
    let amount0_in = U256::from_big_endian(&log.data[0..32]);
    let amount1_in = U256::from_big_endian(&log.data[32..64]);
    let amount0_out = U256::from_big_endian(&log.data[64..96]);
    let amount1_out = U256::from_big_endian(&log.data[96..128]);

    Ok(SwapEvent {
        pool_address: address_to_string(&log.address),
        sender: address_to_string(&topic_to_address(&log.topics[1])),
        recipient: address_to_string(&topic_to_address(&log.topics[2])),
        amount0_in,
        amount1_in,
        amount0_out,
        amount1_out,
        log_index: log
            .log_index
            .map(|v| v.as_u64())
            .unwrap_or(position),
    })
}

fn topic_to_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

/// Lowercase 0x-prefixed rendering used for all address comparisons.
pub fn address_to_string(address: &Address) -> String {
    format!("{:#x}", address)
}
