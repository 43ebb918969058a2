mod user;
pub use user::{UserEntity, UserEntityCreateUpdate};

mod lesson_slot;
pub use lesson_slot::{LessonSlot, LessonSlotCreate, SlotFilter};

mod reservation;
pub use reservation::{Reservation, ReservationCreate, ReservationFilter};

mod payment;
pub use payment::{DueCharge, Payment};

mod subscription;
pub use subscription::{Subscription, SubscriptionSync};

mod webhook_event;
pub use webhook_event::WebhookEvent;

pub mod note_session;
pub use note_session::{NoteSession, NoteSessionCreate, NoteSessionFilter};

pub mod note_fragment;
pub use note_fragment::{NoteFragment, NoteFragmentCreate, NoteFragmentFilter};

pub mod note_project;
pub use note_project::{NoteProject, NoteProjectData, NoteProjectSummary};

mod mentor;
pub use mentor::MentorDirectory;
