use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rx_core::dispense::{DispenseRequest, DispenseRequestLine};
use rx_core::inventory::NewInventoryRecord;
use rx_core::medication::NewMedication;
use rx_core::prescription::{NewPrescription, NewPrescriptionItem};
use rx_core::{schedule, CoreConfig, PharmacyService};

#[derive(Parser)]
#[command(name = "rx")]
#[command(about = "rx dispensing and inventory engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Say hi
    Hi,
    /// Derive a prescription end date from item durations
    EndDate {
        /// Start date (YYYY-MM-DD)
        start_date: String,
        /// Item durations in days (comma-separated, e.g. 10,30)
        durations: String,
    },
    /// Run a seeded dispensing scenario against an in-process engine
    Demo,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Hi) => {
            println!("hi");
        }
        Some(Commands::EndDate {
            start_date,
            durations,
        }) => {
            let start: NaiveDate = start_date.parse()?;
            let durations: Vec<Option<u32>> = durations
                .split(',')
                .map(|d| d.trim().parse::<u32>().map(Some))
                .collect::<Result<_, _>>()?;

            match schedule::end_date(start, &durations) {
                Some(end) => println!("End date: {end}"),
                None => println!("No end date (no item specifies a duration)"),
            }
        }
        Some(Commands::Demo) => run_demo()?,
        None => {
            println!("rx dispensing and inventory engine. Try `rx demo`.");
        }
    }

    Ok(())
}

/// Seeds an in-process engine and walks one prescription through partial and
/// completing dispenses, printing the state after each step.
fn run_demo() -> Result<(), Box<dyn std::error::Error>> {
    let service = PharmacyService::new(&CoreConfig::default());

    let facility = service.register_facility("Demo Clinic")?;
    let nurse = service.register_nurse("Demo Nurse")?;
    let patient = service.register_patient("Demo Patient")?;

    let medication = service.register_medication(NewMedication {
        name: "Amoxicillin".into(),
        generic_name: "amoxicillin".into(),
        form: "capsule".into(),
        strength: "250mg".into(),
        is_controlled: false,
        is_art: false,
    })?;

    let record = service.add_inventory_record(NewInventoryRecord {
        facility_id: facility,
        medication_id: medication.id,
        quantity_on_hand: 40,
        reorder_level: 10,
        unit: "capsules".into(),
        batch_number: Some("B-DEMO-1".into()),
        expiry_date: None,
        supplier: None,
        cost_per_unit: None,
    })?;
    println!(
        "Stocked {} x{} at record {}",
        medication.name, 40, record.id
    );

    let prescription = service.create_prescription(NewPrescription {
        patient_id: patient,
        facility_id: facility,
        prescriber_id: rx_id::EntityId::new(),
        start_date: "2025-01-01".parse()?,
        notes: None,
        items: vec![NewPrescriptionItem {
            medication_id: medication.id,
            dosage: "1 capsule".into(),
            frequency: "three times daily".into(),
            quantity: 21,
            duration_days: Some(7),
            instructions: None,
        }],
    })?;
    println!(
        "Created {} (end date {:?}, status {})",
        prescription.number, prescription.end_date, prescription.status
    );

    for quantity in [10u32, 11] {
        let outcome = service.dispense(DispenseRequest {
            prescription_id: prescription.id,
            nurse_id: nurse,
            facility_id: facility,
            lines: vec![DispenseRequestLine {
                prescription_item_id: prescription.items[0].id,
                quantity_dispensed: quantity,
                batch_number: None,
                notes: None,
            }],
        })?;
        println!(
            "Dispensed {} -> prescription {}",
            quantity, outcome.prescription_status
        );
    }

    let availability = service.availability(facility, medication.id);
    println!(
        "Stock now {} {} (low: {})",
        availability.quantity_on_hand,
        availability.unit.as_deref().unwrap_or("N/A"),
        availability.is_low
    );

    println!("Audit trail:");
    for tx in service.audit_log() {
        for line in &tx.lines {
            println!(
                "  {} item {} qty {}",
                tx.dispensed_at.to_rfc3339(),
                line.prescription_item_id,
                line.quantity_dispensed
            );
        }
    }

    Ok(())
}
