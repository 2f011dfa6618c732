use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_rebooking, check_text_len, find_conflicts, require_text, sync_car_status, today,
    validate_range,
};
use super::{BookingOutcome, Engine, EngineError};

impl Engine {
    // ── Cars ─────────────────────────────────────────────────

    pub async fn add_car(&self, new: NewCar) -> Result<Car, EngineError> {
        require_text(&new.name, "name")?;
        require_text(&new.plate_number, "plate_number")?;
        require_text(&new.model, "model")?;

        let mut guard = self.state.write().await;
        if guard.cars.len() >= MAX_CARS_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many cars"));
        }
        if guard.car(&new.id).is_some() {
            return Err(EngineError::AlreadyExists(new.id));
        }

        let car = Car {
            id: new.id,
            owner: self.owner().to_string(),
            name: new.name.trim().to_string(),
            plate_number: new.plate_number.trim().to_string(),
            model: new.model.trim().to_string(),
            status: new.status.unwrap_or_default(),
            last_service_date: Some(today()),
            next_service_date: None,
        };
        let mut cars = guard.cars.clone();
        cars.push(car.clone());
        self.persist(&cars).await?;
        guard.cars = cars;
        info!(owner = self.owner(), car = %car.id, "car added");
        Ok(car)
    }

    /// Apply a partial update. Setting the status here is how an owner puts a
    /// car into or out of Maintenance; recording a service sets the dates.
    pub async fn update_car(&self, id: Ulid, changes: CarChanges) -> Result<Car, EngineError> {
        for (value, field) in [
            (&changes.name, "name"),
            (&changes.plate_number, "plate_number"),
            (&changes.model, "model"),
        ] {
            if let Some(v) = value {
                require_text(v, field)?;
            }
        }

        let mut guard = self.state.write().await;
        let mut cars = guard.cars.clone();
        let car = cars
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(EngineError::NotFound(id))?;

        if let Some(name) = changes.name {
            car.name = name.trim().to_string();
        }
        if let Some(plate) = changes.plate_number {
            car.plate_number = plate.trim().to_string();
        }
        if let Some(model) = changes.model {
            car.model = model.trim().to_string();
        }
        if let Some(status) = changes.status {
            car.status = status;
        }
        if let Some(day) = changes.last_service_date {
            car.last_service_date = Some(day);
        }
        if let Some(day) = changes.next_service_date {
            car.next_service_date = Some(day);
        }
        let updated = car.clone();

        self.persist(&cars).await?;
        guard.cars = cars;
        Ok(updated)
    }

    pub async fn delete_car(&self, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.state.write().await;
        if guard.car(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        if guard
            .bookings
            .iter()
            .any(|b| b.car_id == id && b.status.holds_dates())
        {
            return Err(EngineError::HasActiveBookings(id));
        }

        let cars: Vec<Car> = guard.cars.iter().filter(|c| c.id != id).cloned().collect();
        self.persist(&cars).await?;
        guard.cars = cars;
        info!(owner = self.owner(), car = %id, "car deleted");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Owner entry: stored as Approved. Overlaps require the rebooking flag.
    pub async fn create_booking(&self, new: NewBooking) -> Result<BookingOutcome, EngineError> {
        self.insert_booking(new, BookingStatus::Approved).await
    }

    /// Public submission: always stored as Pending. The customer cannot see
    /// other bookings, so overlaps are accepted and flagged for the owner.
    pub async fn submit_booking_request(
        &self,
        mut new: NewBooking,
    ) -> Result<BookingOutcome, EngineError> {
        new.amount_paid = 0;
        new.rebooking = true;
        let outcome = self.insert_booking(new, BookingStatus::Pending).await?;
        info!(
            owner = self.owner(),
            booking = %outcome.booking.id,
            conflicts = outcome.conflicts.len(),
            "public booking request received"
        );
        Ok(outcome)
    }

    async fn insert_booking(
        &self,
        new: NewBooking,
        status: BookingStatus,
    ) -> Result<BookingOutcome, EngineError> {
        require_text(&new.customer_name, "customer_name")?;
        require_text(&new.contact, "contact")?;
        if let Some(p) = &new.purpose {
            check_text_len(p)?;
        }
        if new.amount_paid < 0 {
            return Err(EngineError::MissingField("amount_paid"));
        }
        let range = validate_range(new.start_date, new.end_date)?;

        let mut guard = self.state.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        if guard.booking(&new.id).is_some() {
            return Err(EngineError::AlreadyExists(new.id));
        }
        let car = guard.car(&new.car_id).ok_or(EngineError::NotFound(new.car_id))?;
        if status == BookingStatus::Pending && car.status == CarStatus::Maintenance {
            return Err(EngineError::Forbidden("car is under maintenance"));
        }

        let conflicts = find_conflicts(&guard.bookings, new.car_id, &range, None);
        check_rebooking(&conflicts, new.rebooking)?;

        let booking = Booking {
            id: new.id,
            owner: self.owner().to_string(),
            car_id: new.car_id,
            customer_name: new.customer_name.trim().to_string(),
            contact: new.contact.trim().to_string(),
            start_date: range.start,
            end_date: range.end,
            purpose: new.purpose.filter(|p| !p.trim().is_empty()),
            amount_paid: new.amount_paid,
            status,
            rebooking: !conflicts.is_empty(),
        };

        let mut bookings = guard.bookings.clone();
        bookings.push(booking.clone());
        let mut cars = guard.cars.clone();
        let car_changed = sync_car_status(&mut cars, &bookings, booking.car_id);
        self.commit_bookings(&mut guard, bookings, car_changed.then_some(cars))
            .await?;

        if !conflicts.is_empty() {
            warn!(
                owner = self.owner(),
                booking = %booking.id,
                conflicts = conflicts.len(),
                "booking overlaps existing bookings (rebooking)"
            );
        }
        Ok(BookingOutcome { booking, conflicts })
    }

    /// Edit dates, payment, flag or status. Status transitions are
    /// caller-driven: any status may follow any other. Approval and reviving
    /// a Rejected or Completed booking never fail on overlaps; they are
    /// returned and the booking is flagged as a rebooking. Moving dates or
    /// clearing the flag fails with `Conflict` while overlaps remain.
    pub async fn update_booking(
        &self,
        id: Ulid,
        changes: BookingChanges,
    ) -> Result<BookingOutcome, EngineError> {
        let mut guard = self.state.write().await;
        let current = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;
        let mut updated = current.clone();

        if let Some(flag) = changes.rebooking {
            updated.rebooking = flag;
        }
        if let Some(status) = changes.status {
            updated.status = status;
        }
        if let Some(amount) = changes.amount_paid {
            if amount < 0 {
                return Err(EngineError::MissingField("amount_paid"));
            }
            updated.amount_paid = amount;
        }

        if changes.touches_dates() {
            let range = validate_range(
                changes.start_date.unwrap_or(current.start_date),
                changes.end_date.unwrap_or(current.end_date),
            )?;
            updated.start_date = range.start;
            updated.end_date = range.end;
        }

        // Moving dates or clearing the flag follows the owner-entry policy.
        // Approval and reviving a rejected or completed booking only flag.
        let clears_flag = current.rebooking && !updated.rebooking;
        let strict = changes.touches_dates() || clears_flag;
        let revived = !current.status.holds_dates();
        let approved = updated.status == BookingStatus::Approved
            && current.status != BookingStatus::Approved;
        let mut conflicts = Vec::new();
        if updated.status.holds_dates() && (strict || revived || approved) {
            conflicts = find_conflicts(&guard.bookings, updated.car_id, &updated.range(), Some(id));
            if strict {
                check_rebooking(&conflicts, updated.rebooking)?;
            }
        }
        if !conflicts.is_empty() {
            updated.rebooking = true;
            warn!(
                owner = self.owner(),
                booking = %id,
                conflicts = conflicts.len(),
                "booking overlaps existing bookings"
            );
        }

        let bookings: Vec<Booking> = guard
            .bookings
            .iter()
            .map(|b| if b.id == id { updated.clone() } else { b.clone() })
            .collect();
        let mut cars = guard.cars.clone();
        let car_changed = sync_car_status(&mut cars, &bookings, updated.car_id);
        self.commit_bookings(&mut guard, bookings, car_changed.then_some(cars))
            .await?;

        if current.status != updated.status {
            info!(
                owner = self.owner(),
                booking = %id,
                from = %current.status,
                to = %updated.status,
                "booking status changed"
            );
        }
        Ok(BookingOutcome {
            booking: updated,
            conflicts,
        })
    }

    // ── Expenses ─────────────────────────────────────────────

    pub async fn add_expense(&self, new: NewExpense) -> Result<Expense, EngineError> {
        require_text(&new.description, "description")?;
        if new.amount <= 0 {
            return Err(EngineError::MissingField("amount"));
        }

        let mut guard = self.state.write().await;
        if guard.expenses.len() >= MAX_EXPENSES_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many expenses"));
        }
        if guard.expenses.iter().any(|e| e.id == new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        if guard.car(&new.car_id).is_none() {
            return Err(EngineError::NotFound(new.car_id));
        }

        let expense = Expense {
            id: new.id,
            owner: self.owner().to_string(),
            car_id: new.car_id,
            date: new.date.unwrap_or_else(today),
            description: new.description.trim().to_string(),
            amount: new.amount,
            kind: new.kind,
        };
        let mut expenses = guard.expenses.clone();
        expenses.push(expense.clone());
        self.persist(&expenses).await?;
        guard.expenses = expenses;
        Ok(expense)
    }

    // ── Users ────────────────────────────────────────────────

    /// Add a login to this owner account.
    pub async fn add_user(&self, username: &str, password: &str) -> Result<User, EngineError> {
        self.insert_user(username, password, false).await
    }

    /// Account sign-up through the public link: only the first user of an
    /// owner can be created this way.
    pub async fn sign_up(&self, username: &str, password: &str) -> Result<User, EngineError> {
        self.insert_user(username, password, true).await
    }

    async fn insert_user(
        &self,
        username: &str,
        password: &str,
        first_only: bool,
    ) -> Result<User, EngineError> {
        require_text(username, "username")?;
        require_text(password, "password")?;
        let username = username.trim();
        if username.eq_ignore_ascii_case(PUBLIC_USER) {
            return Err(EngineError::Forbidden("username is reserved"));
        }

        let mut guard = self.state.write().await;
        if first_only && !guard.users.is_empty() {
            return Err(EngineError::Forbidden("owner account already registered"));
        }
        if guard.users.len() >= MAX_USERS_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if guard.users.iter().any(|u| u.username == username) {
            return Err(EngineError::UserExists(username.to_string()));
        }

        let user = User {
            username: username.to_string(),
            password: password.to_string(),
            owner: self.owner().to_string(),
        };
        let mut users = guard.users.clone();
        users.push(user.clone());
        self.persist(&users).await?;
        guard.users = users;
        info!(owner = self.owner(), user = %user.username, "user added");
        Ok(user)
    }
}
