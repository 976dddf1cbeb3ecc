// Per-chain native-token USD price, hot-swappable under a read lock
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;

/// A single scalar injected at startup and safe to replace at runtime.
/// Live pricing is a future extension; everything downstream reads through
/// this handle so a refresh never races a calculation.
#[derive(Clone)]
pub struct NativePrice {
    inner: Arc<RwLock<Decimal>>,
}

impl NativePrice {
    pub fn new(initial: Decimal) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn get(&self) -> Decimal {
        *self.inner.read()
    }

    pub fn set(&self, price: Decimal) {
        *self.inner.write() = price;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_updates_are_visible_to_clones() {
        let price = NativePrice::new(dec!(300));
        let reader = price.clone();

        assert_eq!(reader.get(), dec!(300));
        price.set(dec!(312.5));
        assert_eq!(reader.get(), dec!(312.5));
    }
}
