pub mod answers;
pub mod events;
pub mod mentors;
