//! Message handlers for the classroom protocol: session attachment, room
//! lifecycle, and course assignment.

pub mod courses;
pub mod rooms;
pub mod session;

use crate::bus::{Channel, MessageRouter};

/// Wires every classroom handler into the router. Called once at startup;
/// the router is immutable after this.
pub fn register_handlers(router: &mut MessageRouter) {
    router.subscribe("session.attach", Channel::Origin, session::attach_session);
    router.subscribe("room.open", Channel::Origin, rooms::open_room);
    router.subscribe("room.join", Channel::Origin, rooms::join_room);
    router.subscribe("course.create", Channel::Origin, courses::create_course);
    router.subscribe(
        "course.assignToRoom",
        Channel::Origin,
        courses::assign_course_to_room,
    );
    router.subscribe(
        "course.assigned",
        Channel::Loopback,
        courses::sync_assigned_course,
    );
}
