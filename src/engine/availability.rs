use ulid::Ulid;

use crate::model::*;

// ── Availability Engine ──────────────────────────────────────────

/// Outcome of checking one car against a candidate range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    /// Every live booking that overlaps the range, in input order.
    pub conflicts: Vec<Booking>,
}

/// Check whether `car` can be booked for `[start, end)`.
///
/// Only Pending and Approved bookings on this car are considered. A booking
/// conflicts when `start < other.end && end > other.start`, so back-to-back
/// rentals sharing a checkout/checkin day do not collide. A same-day range
/// occupies its single day. All conflicts are
/// returned, not just the first, so the caller can show full rebooking context.
pub fn is_available(
    car: &Car,
    start: Day,
    end: Day,
    existing: &[Booking],
) -> Result<Availability, InvalidRange> {
    let range = DateRange::new(start, end)?;
    Ok(check_range(car.id, &range, existing))
}

/// Same as [`is_available`] over an already-validated range.
pub fn check_range(car_id: Ulid, range: &DateRange, existing: &[Booking]) -> Availability {
    let conflicts: Vec<Booking> = conflicts_in(car_id, range, existing).cloned().collect();
    Availability {
        available: conflicts.is_empty(),
        conflicts,
    }
}

/// Live bookings on `car_id` overlapping `range`, in input order.
pub fn conflicts_in<'a>(
    car_id: Ulid,
    range: &'a DateRange,
    bookings: &'a [Booking],
) -> impl Iterator<Item = &'a Booking> + 'a {
    bookings
        .iter()
        .filter(move |b| b.car_id == car_id && b.status.holds_dates())
        .filter(move |b| range.overlaps(&b.range()))
}

/// Cars that can be offered for `[start, end)`.
///
/// A car is listed unless it is in Maintenance or an Approved booking fully
/// covers the requested range. Pending overlaps never exclude a car since
/// rebooking is permitted; callers surface them via [`check_range`].
pub fn list_available_cars(
    cars: &[Car],
    start: Day,
    end: Day,
    bookings: &[Booking],
) -> Result<Vec<Car>, InvalidRange> {
    let range = DateRange::new(start, end)?;
    Ok(available_cars_in(cars, &range, bookings).cloned().collect())
}

pub fn available_cars_in<'a>(
    cars: &'a [Car],
    range: &'a DateRange,
    bookings: &'a [Booking],
) -> impl Iterator<Item = &'a Car> + 'a {
    cars.iter()
        .filter(|car| car.status != CarStatus::Maintenance)
        .filter(move |car| {
            !bookings.iter().any(|b| {
                b.car_id == car.id
                    && b.status == BookingStatus::Approved
                    && b.range().covers(range)
            })
        })
}
