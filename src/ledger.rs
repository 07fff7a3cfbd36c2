//! The two halves of the slip's data model: the raw Input Set typed by the
//! user and the Derived Cell Set computed from it.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Every value the form can feed into a recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputField {
    Quantity,
    Rate,
    LorryHire,
    Discount,
    DiscountPercent,
    SellerCommission,
    QtyDiff,
    PaymentAmount,
    MillerName,
    PartyName,
    BillNo,
    ArrivalDate,
    PaymentRef,
    PaymentDate,
    Bank,
    Remarks,
}

impl InputField {
    pub const ALL: [InputField; 16] = [
        InputField::Quantity,
        InputField::Rate,
        InputField::LorryHire,
        InputField::Discount,
        InputField::DiscountPercent,
        InputField::SellerCommission,
        InputField::QtyDiff,
        InputField::PaymentAmount,
        InputField::MillerName,
        InputField::PartyName,
        InputField::BillNo,
        InputField::ArrivalDate,
        InputField::PaymentRef,
        InputField::PaymentDate,
        InputField::Bank,
        InputField::Remarks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputField::Quantity => "quantity",
            InputField::Rate => "rate",
            InputField::LorryHire => "lorry_hire",
            InputField::Discount => "discount",
            InputField::DiscountPercent => "discount_percent",
            InputField::SellerCommission => "seller_commission",
            InputField::QtyDiff => "qty_diff",
            InputField::PaymentAmount => "payment_amount",
            InputField::MillerName => "miller_name",
            InputField::PartyName => "party_name",
            InputField::BillNo => "bill_no",
            InputField::ArrivalDate => "arrival_date",
            InputField::PaymentRef => "payment_ref",
            InputField::PaymentDate => "payment_date",
            InputField::Bank => "bank",
            InputField::Remarks => "remarks",
        }
    }

    /// Numeric fields go through the permissive parser; the rest are text
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            InputField::Quantity
                | InputField::Rate
                | InputField::LorryHire
                | InputField::Discount
                | InputField::DiscountPercent
                | InputField::SellerCommission
                | InputField::QtyDiff
                | InputField::PaymentAmount
        )
    }

    pub fn is_date(&self) -> bool {
        matches!(self, InputField::ArrivalDate | InputField::PaymentDate)
    }
}

impl fmt::Display for InputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['-', ' '], "_");
        InputField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == wanted)
            .ok_or_else(|| format!("unknown input field: {}", s))
    }
}

/// Raw user input, one string per field. The single source of truth for
/// every derived cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InputSet {
    values: BTreeMap<InputField, String>,
}

impl InputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: InputField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: InputField, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    pub fn clear(&mut self, field: InputField) {
        self.values.remove(&field);
    }

    /// Raw text for a field, empty when never set
    pub fn get(&self, field: InputField) -> &str {
        self.values.get(&field).map(String::as_str).unwrap_or("")
    }

    pub fn iter(&self) -> impl Iterator<Item = (InputField, &str)> {
        self.values.iter().map(|(field, value)| (*field, value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Input files may hold bare numbers; they are kept as their text form.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl RawValue {
    fn into_text(self) -> String {
        match self {
            RawValue::Text(text) => text,
            RawValue::Integer(n) => n.to_string(),
            RawValue::Float(n) => n.to_string(),
            RawValue::Flag(b) => b.to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for InputSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<InputField, RawValue>::deserialize(deserializer)?;
        Ok(InputSet {
            values: raw.into_iter().map(|(field, value)| (field, value.into_text())).collect(),
        })
    }
}

/// Named derived cells. Placed cells carry the grid slot they are painted
/// into; a handful of figures are kept without a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellId {
    MillerName,
    PartyName,
    BillNo,
    ArrivalDate,
    Quantity,
    Rate,
    Gross,
    LorryHire,
    TotalMirror,
    TotalAux,
    Discount,
    NetAfterTotal,
    SellerCommission,
    PaymentMirror,
    Balance,
    QtyDiff,
    Remarks,
    Total,
    TotalSummary,
    PaymentAmount,
    PaymentRef,
    PaymentDate,
    Bank,
    /// Percentage discount path, kept for compatibility
    DiscountAmount,
    /// `lorryAndAdjust - payment`; computed, never shown as the balance
    LegacyShortage,
}

impl CellId {
    pub const ALL: [CellId; 25] = [
        CellId::MillerName,
        CellId::PartyName,
        CellId::BillNo,
        CellId::ArrivalDate,
        CellId::Quantity,
        CellId::Rate,
        CellId::Gross,
        CellId::LorryHire,
        CellId::TotalMirror,
        CellId::TotalAux,
        CellId::Discount,
        CellId::NetAfterTotal,
        CellId::SellerCommission,
        CellId::PaymentMirror,
        CellId::Balance,
        CellId::QtyDiff,
        CellId::Remarks,
        CellId::Total,
        CellId::TotalSummary,
        CellId::PaymentAmount,
        CellId::PaymentRef,
        CellId::PaymentDate,
        CellId::Bank,
        CellId::DiscountAmount,
        CellId::LegacyShortage,
    ];

    /// Grid address on the printed slip
    pub fn slot(&self) -> Option<&'static str> {
        let slot = match self {
            CellId::MillerName => "B1",
            CellId::PartyName => "B2",
            CellId::BillNo => "B3",
            CellId::ArrivalDate => "B4",
            CellId::Quantity => "B5",
            CellId::Rate => "D5",
            CellId::Gross => "E5",
            CellId::LorryHire => "B6",
            CellId::TotalMirror => "E6",
            CellId::TotalAux => "G6",
            CellId::Discount => "B7",
            CellId::NetAfterTotal => "E7",
            CellId::SellerCommission => "B8",
            CellId::PaymentMirror => "E8",
            CellId::Balance => "E9",
            CellId::QtyDiff => "B10",
            CellId::Remarks => "D10",
            CellId::Total => "B11",
            CellId::TotalSummary => "E11",
            CellId::PaymentAmount => "I6",
            CellId::PaymentRef => "I7",
            CellId::PaymentDate => "I8",
            CellId::Bank => "I9",
            CellId::DiscountAmount | CellId::LegacyShortage => return None,
        };
        Some(slot)
    }

    pub fn from_slot(slot: &str) -> Option<CellId> {
        CellId::ALL.iter().copied().find(|cell| cell.slot() == Some(slot))
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(
            self,
            CellId::MillerName
                | CellId::PartyName
                | CellId::BillNo
                | CellId::ArrivalDate
                | CellId::Remarks
                | CellId::PaymentRef
                | CellId::PaymentDate
                | CellId::Bank
        )
    }
}

/// Sign of the final balance, drives the excess/shortage styling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceClass {
    Excess,
    Shortage,
    Settled,
}

impl BalanceClass {
    pub fn from_balance(value: f64) -> Self {
        if value > 0.0 {
            BalanceClass::Excess
        } else if value < 0.0 {
            BalanceClass::Shortage
        } else {
            BalanceClass::Settled
        }
    }

    /// Style class on the balance cell, if any
    pub fn css_class(&self) -> Option<&'static str> {
        match self {
            BalanceClass::Excess => Some("pos"),
            BalanceClass::Shortage => Some("neg"),
            BalanceClass::Settled => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BalanceClass::Excess => "Excess",
            BalanceClass::Shortage => "Shortage",
            BalanceClass::Settled => "Settled",
        }
    }
}

/// Raw computed numbers behind the display strings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Figures {
    pub gross: f64,
    pub discount_amount: f64,
    pub lorry_and_adjust: f64,
    pub total: f64,
    pub net_after_total: f64,
    pub shortage_or_excess: f64,
    pub legacy_shortage: f64,
}

/// Fresh display grid produced by one recompute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedCells {
    pub cells: BTreeMap<CellId, String>,
    pub figures: Figures,
    pub balance_class: BalanceClass,
}

impl DerivedCells {
    pub fn get(&self, cell: CellId) -> &str {
        self.cells.get(&cell).map(String::as_str).unwrap_or("")
    }

    /// Lookup by grid address, e.g. `"E9"`
    pub fn at_slot(&self, slot: &str) -> Option<&str> {
        CellId::from_slot(slot).map(|cell| self.get(cell))
    }

    /// Human summary of the balance, e.g. `Excess 300.00`
    pub fn balance_text(&self) -> String {
        format!("{} {}", self.balance_class.label(), self.get(CellId::Balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_field_parsing() {
        assert_eq!("lorry_hire".parse::<InputField>().unwrap(), InputField::LorryHire);
        assert_eq!("Lorry Hire".parse::<InputField>().unwrap(), InputField::LorryHire);
        assert_eq!("qty-diff".parse::<InputField>().unwrap(), InputField::QtyDiff);
        assert!("tonnage".parse::<InputField>().is_err());
    }

    #[test]
    fn test_input_set_defaults_to_empty_text() {
        let inputs = InputSet::new().with(InputField::Rate, "2500");
        assert_eq!(inputs.get(InputField::Rate), "2500");
        assert_eq!(inputs.get(InputField::Quantity), "");
    }

    #[test]
    fn test_input_set_from_toml_accepts_numbers() {
        let inputs: InputSet = toml::from_str(
            "quantity = 10\nrate = 2500.5\nmiller_name = \"Sri Rama Mills\"\n",
        )
        .unwrap();
        assert_eq!(inputs.get(InputField::Quantity), "10");
        assert_eq!(inputs.get(InputField::Rate), "2500.5");
        assert_eq!(inputs.get(InputField::MillerName), "Sri Rama Mills");
    }

    #[test]
    fn test_every_placed_cell_has_unique_slot() {
        let mut seen = std::collections::HashSet::new();
        for cell in CellId::ALL {
            if let Some(slot) = cell.slot() {
                assert!(seen.insert(slot), "duplicate slot {}", slot);
                assert_eq!(CellId::from_slot(slot), Some(cell));
            }
        }
        assert_eq!(CellId::DiscountAmount.slot(), None);
    }

    #[test]
    fn test_balance_class() {
        assert_eq!(BalanceClass::from_balance(300.0), BalanceClass::Excess);
        assert_eq!(BalanceClass::from_balance(-400.0), BalanceClass::Shortage);
        assert_eq!(BalanceClass::from_balance(0.0), BalanceClass::Settled);
        assert_eq!(BalanceClass::Settled.css_class(), None);
    }
}
