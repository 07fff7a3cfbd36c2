use std::collections::BTreeMap;
use tracing::trace;

use crate::format::{format_amount, format_date, format_number, parse_input, sanitize_remarks};
use crate::ledger::{BalanceClass, CellId, DerivedCells, Figures, InputField, InputSet};

/// Compute the full slip grid from one Input Set snapshot.
///
/// Pure and total: every figure comes from parsed inputs, never from another
/// cell's display string, so the same inputs always give the same grid.
pub fn recompute(inputs: &InputSet) -> DerivedCells {
    let num = |field: InputField| parse_input(inputs.get(field));

    let quantity = num(InputField::Quantity);
    let rate = num(InputField::Rate);
    let lorry_hire = num(InputField::LorryHire);
    let discount = num(InputField::Discount);
    let discount_percent = num(InputField::DiscountPercent);
    let seller_commission = num(InputField::SellerCommission);
    let qty_diff = num(InputField::QtyDiff);
    let payment = num(InputField::PaymentAmount);

    let gross = quantity * rate;
    let discount_amount = gross * discount_percent / 100.0;
    // Shortage is never clubbed into this total
    let lorry_and_adjust = lorry_hire + discount + seller_commission + qty_diff;
    let total = lorry_and_adjust;
    let net_after_total = gross - total;
    let shortage_or_excess = net_after_total - payment;
    let legacy_shortage = lorry_and_adjust - payment;

    let figures = Figures {
        gross,
        discount_amount,
        lorry_and_adjust,
        total,
        net_after_total,
        shortage_or_excess,
        legacy_shortage,
    };
    let balance_class = BalanceClass::from_balance(shortage_or_excess);

    let total_text = format_number(total, false);
    let payment_text = format_number(payment, false);

    let mut cells = BTreeMap::new();
    let mut put = |cell: CellId, value: String| {
        cells.insert(cell, value);
    };

    put(CellId::MillerName, inputs.get(InputField::MillerName).to_string());
    put(CellId::PartyName, inputs.get(InputField::PartyName).to_string());
    put(CellId::BillNo, inputs.get(InputField::BillNo).to_string());
    put(CellId::ArrivalDate, format_date(inputs.get(InputField::ArrivalDate)));

    put(CellId::Quantity, format_number(quantity, false));
    put(CellId::Rate, format_number(rate, false));
    put(CellId::Gross, format_number(gross, false));

    put(CellId::LorryHire, format_number(lorry_hire, false));
    put(CellId::Discount, format_number(discount, false));
    put(CellId::SellerCommission, format_number(seller_commission, false));
    put(CellId::QtyDiff, format_number(qty_diff, false));

    // One total, four slots
    put(CellId::Total, total_text.clone());
    put(CellId::TotalSummary, total_text.clone());
    put(CellId::TotalMirror, total_text.clone());
    put(CellId::TotalAux, total_text);

    put(CellId::NetAfterTotal, format_number(net_after_total, false));

    // Payment amount shown in the cheque column and mirrored beside the net
    put(CellId::PaymentAmount, payment_text.clone());
    put(CellId::PaymentMirror, payment_text);

    // Magnitude only; the sign lives in the balance class
    put(CellId::Balance, format_amount(shortage_or_excess.abs()));

    put(CellId::Remarks, sanitize_remarks(inputs.get(InputField::Remarks)));
    put(CellId::PaymentRef, inputs.get(InputField::PaymentRef).to_string());
    put(CellId::PaymentDate, format_date(inputs.get(InputField::PaymentDate)));
    put(CellId::Bank, inputs.get(InputField::Bank).to_string());

    put(CellId::DiscountAmount, format_number(discount_amount, false));
    put(CellId::LegacyShortage, format_number(legacy_shortage, false));

    trace!(
        gross,
        total,
        shortage_or_excess,
        "recomputed slip ({:?})",
        balance_class
    );

    DerivedCells {
        cells,
        figures,
        balance_class,
    }
}

/// Keeps the last snapshot so the presentation layer can skip repaints.
#[derive(Debug, Default)]
pub struct RecomputeEngine {
    last_inputs: Option<InputSet>,
    last_cells: Option<DerivedCells>,
}

impl RecomputeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute for a new snapshot. Returns `None` when the snapshot equals
    /// the previous one, i.e. nothing visible would change.
    pub fn update(&mut self, inputs: &InputSet) -> Option<&DerivedCells> {
        if self.last_inputs.as_ref() == Some(inputs) {
            return None;
        }
        self.last_inputs = Some(inputs.clone());
        self.last_cells = Some(recompute(inputs));
        self.last_cells.as_ref()
    }

    pub fn current(&self) -> Option<&DerivedCells> {
        self.last_cells.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inputs() -> InputSet {
        InputSet::new()
            .with(InputField::Quantity, "10")
            .with(InputField::Rate, "2500")
            .with(InputField::LorryHire, "150")
            .with(InputField::Discount, "50")
            .with(InputField::SellerCommission, "0")
            .with(InputField::QtyDiff, "0")
            .with(InputField::PaymentAmount, "24500")
    }

    #[test]
    fn test_excess_balance() {
        let derived = recompute(&sample_inputs());

        assert_eq!(derived.figures.gross, 25000.0);
        assert_eq!(derived.figures.total, 200.0);
        assert_eq!(derived.figures.net_after_total, 24800.0);
        assert_eq!(derived.figures.shortage_or_excess, 300.0);
        assert_eq!(derived.balance_class, BalanceClass::Excess);

        assert_eq!(derived.get(CellId::Gross), "25,000");
        assert_eq!(derived.get(CellId::NetAfterTotal), "24,800");
        assert_eq!(derived.get(CellId::Balance), "300.00");
    }

    #[test]
    fn test_shortage_balance_shows_magnitude() {
        let inputs = sample_inputs().with(InputField::PaymentAmount, "25200");
        let derived = recompute(&inputs);

        assert_eq!(derived.figures.shortage_or_excess, -400.0);
        assert_eq!(derived.balance_class, BalanceClass::Shortage);
        assert_eq!(derived.get(CellId::Balance), "400.00");
        assert_eq!(derived.balance_text(), "Shortage 400.00");
    }

    #[test]
    fn test_settled_balance_has_no_class() {
        let inputs = sample_inputs().with(InputField::PaymentAmount, "24800");
        let derived = recompute(&inputs);
        assert_eq!(derived.balance_class, BalanceClass::Settled);
        assert_eq!(derived.balance_class.css_class(), None);
    }

    #[test]
    fn test_mirrored_slots_match() {
        let derived = recompute(&sample_inputs());

        for slot in ["E6", "G6", "B11", "E11"] {
            assert_eq!(derived.at_slot(slot), Some("200"), "slot {}", slot);
        }
        assert_eq!(derived.at_slot("I6"), Some("24,500"));
        assert_eq!(derived.at_slot("E8"), derived.at_slot("I6"));
    }

    #[test]
    fn test_retained_formula_paths() {
        let inputs = sample_inputs().with(InputField::DiscountPercent, "2");
        let derived = recompute(&inputs);

        assert_eq!(derived.figures.discount_amount, 500.0);
        assert_eq!(derived.figures.legacy_shortage, 200.0 - 24500.0);
        // Neither path feeds the balance
        assert_eq!(derived.figures.shortage_or_excess, 300.0);
        assert_eq!(derived.get(CellId::DiscountAmount), "500");
        assert_eq!(derived.get(CellId::LegacyShortage), "-24,300");
    }

    #[test]
    fn test_text_cells() {
        let inputs = InputSet::new()
            .with(InputField::MillerName, "Sri Rama Rice Mill")
            .with(InputField::PartyName, "  Lakshmi Traders ")
            .with(InputField::ArrivalDate, "2024-03-07")
            .with(InputField::PaymentDate, "garbage")
            .with(InputField::PaymentRef, "000123")
            .with(InputField::Remarks, "bags   short\n\nby two");
        let derived = recompute(&inputs);

        assert_eq!(derived.get(CellId::MillerName), "Sri Rama Rice Mill");
        assert_eq!(derived.get(CellId::PartyName), "  Lakshmi Traders ");
        assert_eq!(derived.get(CellId::ArrivalDate), "07/03/2024");
        assert_eq!(derived.get(CellId::PaymentDate), "");
        assert_eq!(derived.get(CellId::PaymentRef), "000123");
        assert_eq!(derived.get(CellId::Remarks), "bags short by two");
    }

    #[test]
    fn test_long_remarks_are_clipped() {
        let inputs = InputSet::new().with(InputField::Remarks, "r".repeat(250));
        let derived = recompute(&inputs);
        let remarks = derived.get(CellId::Remarks);
        assert_eq!(remarks.chars().count(), 201);
        assert!(remarks.ends_with('…'));
    }

    #[test]
    fn test_empty_inputs_are_total() {
        let derived = recompute(&InputSet::new());
        assert_eq!(derived.cells.len(), CellId::ALL.len());
        assert_eq!(derived.get(CellId::Total), "0");
        assert_eq!(derived.get(CellId::Balance), "0.00");
        assert_eq!(derived.balance_class, BalanceClass::Settled);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let inputs = sample_inputs().with(InputField::Remarks, "x  y");
        assert_eq!(recompute(&inputs), recompute(&inputs));
    }

    #[test]
    fn test_engine_skips_unchanged_snapshot() {
        let mut engine = RecomputeEngine::new();
        let inputs = sample_inputs();

        assert!(engine.update(&inputs).is_some());
        assert!(engine.update(&inputs).is_none());

        let changed = inputs.clone().with(InputField::QtyDiff, "25");
        let derived = engine.update(&changed).unwrap();
        assert_eq!(derived.get(CellId::Total), "225");
        assert_eq!(engine.current().unwrap().get(CellId::Total), "225");
    }
}
