pub mod parcel;
pub mod resident;
