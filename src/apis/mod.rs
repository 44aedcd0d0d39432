pub mod base;
pub mod claims;
pub mod facility;
pub mod factory;
pub mod medication;
pub mod population;

pub use claims::ClaimsParser;
pub use facility::FacilityParser;
pub use medication::MedicationParser;
pub use population::PopulationParser;
