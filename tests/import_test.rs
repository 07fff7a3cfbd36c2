use patti_slip::format::{format_date, format_number};
use patti_slip::import::{read_rows, scan_and_fill};
use patti_slip::ledger::{CellId, InputField, InputSet};
use patti_slip::recompute::recompute;

const SHEET_TSV: &str = "MILLER NAME\t\t\t\tSRI LAXMI RICE MILL\n\
PARTY NAME\t\t\t\tTEJAS TRADERS\n\
BILL NO\t\tINV-204\n\
ARRIVAL DT\t\t\t\t45000\n\
RATE\t\t\t\t61,250\n\
LORRY\t\t\t\t150\n\
SELLER COM\t\t\t\t20\n\
CHQ AM\t\t\t\t60,000\n\
CHQ DT\t\t\t\t05/04/2023\n\
CHQ NO\t\t\t\t004512\n\
BANK\t\t\t\tSBI\n";

#[test]
fn test_sheet_import_feeds_recompute() {
    let rows = read_rows(SHEET_TSV.as_bytes(), b'\t').unwrap();
    assert_eq!(rows.len(), 11);

    let assignments = scan_and_fill(&rows);
    assert_eq!(assignments.get(InputField::MillerName), Some("SRI LAXMI RICE MILL"));
    assert_eq!(assignments.get(InputField::LorryHire), Some("150"));
    assert_eq!(assignments.get(InputField::ArrivalDate), Some("2023-03-15"));
    assert_eq!(assignments.get(InputField::PaymentDate), Some("2023-04-05"));
    // RATE rows hold a cached amount in exported sheets
    assert_eq!(assignments.get(InputField::Rate), None);

    let mut inputs = InputSet::new()
        .with(InputField::Quantity, "10")
        .with(InputField::Rate, "2500");
    assignments.apply_to(&mut inputs);
    assert_eq!(inputs.get(InputField::Rate), "2500");
    assert_eq!(inputs.get(InputField::PaymentRef), "004512");

    let derived = recompute(&inputs);
    assert_eq!(derived.get(CellId::Total), format_number(170.0, false));
    assert_eq!(derived.get(CellId::PaymentAmount), format_number(60000.0, false));
    assert_eq!(derived.get(CellId::ArrivalDate), format_date("2023-03-15"));
    assert_eq!(derived.get(CellId::Bank), "SBI");
}

#[test]
fn test_reimport_overwrites_only_found_fields() {
    let first = read_rows("BANK,SBI\nCHQ NO,111\n".as_bytes(), b',').unwrap();
    let second = read_rows("CHQ NO,222\n".as_bytes(), b',').unwrap();

    let mut inputs = InputSet::new();
    scan_and_fill(&first).apply_to(&mut inputs);
    scan_and_fill(&second).apply_to(&mut inputs);

    assert_eq!(inputs.get(InputField::Bank), "SBI");
    assert_eq!(inputs.get(InputField::PaymentRef), "222");
}

#[test]
fn test_unreadable_rows_are_ignored() {
    let rows = read_rows("\n,orphan value\nARRIVAL DT,someday\nNOTES,,,,ignored\n".as_bytes(), b',').unwrap();
    let assignments = scan_and_fill(&rows);
    assert!(assignments.is_empty());
}
