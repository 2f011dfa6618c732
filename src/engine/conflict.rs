use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::conflicts_in;
use super::EngineError;

pub(crate) fn today() -> Day {
    chrono::Local::now().date_naive()
}

pub(crate) fn require_text(value: &str, field: &'static str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::MissingField(field));
    }
    check_text_len(value)
}

pub(crate) fn check_text_len(value: &str) -> Result<(), EngineError> {
    if value.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

pub(crate) fn validate_range(start: Day, end: Day) -> Result<DateRange, EngineError> {
    let range = DateRange::new(start, end)?;
    if range.days() > MAX_BOOKING_DAYS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(range)
}

/// Live bookings on `car_id` overlapping `range`, skipping `exclude`
/// (the booking being edited).
pub(crate) fn find_conflicts(
    bookings: &[Booking],
    car_id: Ulid,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Vec<Booking> {
    let conflicts: Vec<Booking> = conflicts_in(car_id, range, bookings)
        .filter(|b| Some(b.id) != exclude)
        .cloned()
        .collect();
    if !conflicts.is_empty() {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
    }
    conflicts
}

/// Overlaps are allowed only when the caller flagged the booking as a rebooking.
pub(crate) fn check_rebooking(conflicts: &[Booking], rebooking: bool) -> Result<(), EngineError> {
    if !conflicts.is_empty() && !rebooking {
        return Err(EngineError::Conflict(conflicts.iter().map(|b| b.id).collect()));
    }
    Ok(())
}

/// Keep the car's status in step with its Approved bookings. Maintenance is
/// an owner decision and is never changed here.
pub(crate) fn sync_car_status(cars: &mut [Car], bookings: &[Booking], car_id: Ulid) -> bool {
    let Some(car) = cars.iter_mut().find(|c| c.id == car_id) else {
        return false;
    };
    let has_approved = bookings
        .iter()
        .any(|b| b.car_id == car_id && b.status == BookingStatus::Approved);
    let next = match car.status {
        CarStatus::Maintenance => return false,
        CarStatus::Available if has_approved => CarStatus::Booked,
        CarStatus::Booked if !has_approved => CarStatus::Available,
        current => current,
    };
    let changed = next != car.status;
    car.status = next;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn car(status: CarStatus) -> Car {
        Car {
            id: Ulid::new(),
            owner: "acme".into(),
            name: "Noah".into(),
            plate_number: "UBB 001A".into(),
            model: "Toyota".into(),
            status,
            last_service_date: None,
            next_service_date: None,
        }
    }

    fn booking(car_id: Ulid, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            owner: "acme".into(),
            car_id,
            customer_name: "C".into(),
            contact: "c@example.com".into(),
            start_date: d("2024-06-01"),
            end_date: d("2024-06-05"),
            purpose: None,
            amount_paid: 0,
            status,
            rebooking: false,
        }
    }

    #[test]
    fn find_conflicts_skips_excluded_booking() {
        let c = car(CarStatus::Available);
        let own = booking(c.id, BookingStatus::Approved);
        let other = booking(c.id, BookingStatus::Pending);
        let range = own.range();
        let found = find_conflicts(&[own.clone(), other.clone()], c.id, &range, Some(own.id));
        assert_eq!(found, vec![other]);
    }

    #[test]
    fn rebooking_flag_accepts_overlap() {
        let c = car(CarStatus::Available);
        let conflicts = vec![booking(c.id, BookingStatus::Approved)];
        assert!(matches!(
            check_rebooking(&conflicts, false),
            Err(EngineError::Conflict(ids)) if ids == vec![conflicts[0].id]
        ));
        assert!(check_rebooking(&conflicts, true).is_ok());
        assert!(check_rebooking(&[], false).is_ok());
    }

    #[test]
    fn validate_range_limits_length() {
        assert!(validate_range(d("2024-01-01"), d("2024-01-10")).is_ok());
        assert!(matches!(
            validate_range(d("2024-01-10"), d("2024-01-01")),
            Err(EngineError::InvalidRange(_))
        ));
        assert!(matches!(
            validate_range(d("2020-01-01"), d("2024-01-01")),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn require_text_rejects_blank() {
        assert!(matches!(
            require_text("   ", "name"),
            Err(EngineError::MissingField("name"))
        ));
        assert!(require_text("Premio", "name").is_ok());
    }

    #[test]
    fn sync_marks_booked_then_available() {
        let c = car(CarStatus::Available);
        let mut cars = vec![c.clone()];
        let mut bookings = vec![booking(c.id, BookingStatus::Approved)];
        assert!(sync_car_status(&mut cars, &bookings, c.id));
        assert_eq!(cars[0].status, CarStatus::Booked);

        bookings[0].status = BookingStatus::Completed;
        assert!(sync_car_status(&mut cars, &bookings, c.id));
        assert_eq!(cars[0].status, CarStatus::Available);
    }

    #[test]
    fn sync_leaves_maintenance_alone() {
        let c = car(CarStatus::Maintenance);
        let mut cars = vec![c.clone()];
        let bookings = vec![booking(c.id, BookingStatus::Approved)];
        assert!(!sync_car_status(&mut cars, &bookings, c.id));
        assert_eq!(cars[0].status, CarStatus::Maintenance);
    }
}
