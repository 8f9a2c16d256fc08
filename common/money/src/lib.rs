use serde::{Deserialize, Serialize};

/// Monetary amount in integer cents.
///
/// All order math happens in cents so line subtotals and header totals are
/// exact; conversion to a display currency is the client's concern.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Unit amount times a line quantity. `None` on overflow.
    pub fn checked_mul_qty(self, quantity: i32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Subtotal for one order line (quantity x unit amount). `None` on overflow.
pub fn line_subtotal(unit: Money, quantity: i32) -> Option<Money> {
    unit.checked_mul_qty(quantity)
}

/// Sum of line subtotals. `None` on overflow.
pub fn order_total<I>(subtotals: I) -> Option<Money>
where
    I: IntoIterator<Item = Money>,
{
    subtotals
        .into_iter()
        .try_fold(Money::ZERO, Money::checked_add)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtotal_is_quantity_times_unit() {
        let unit = Money::from_cents(1000);
        assert_eq!(line_subtotal(unit, 5), Some(Money::from_cents(5000)));
    }

    #[test]
    fn total_sums_line_subtotals() {
        // lines (qty 5 @ $10.00) + (qty 2 @ $7.00) => $64.00
        let lines = [
            line_subtotal(Money::from_cents(1000), 5).unwrap(),
            line_subtotal(Money::from_cents(700), 2).unwrap(),
        ];
        assert_eq!(order_total(lines), Some(Money::from_cents(6400)));
    }

    #[test]
    fn subtotal_overflow_is_none() {
        assert_eq!(line_subtotal(Money::from_cents(i64::MAX), 2), None);
    }

    #[test]
    fn total_overflow_is_none() {
        let lines = [Money::from_cents(i64::MAX), Money::from_cents(1)];
        assert_eq!(order_total(lines), None);
    }

    #[test]
    fn display_renders_cents() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(-5).to_string(), "-0.05");
    }
}
