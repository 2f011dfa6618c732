use ulid::Ulid;

use crate::model::*;

use super::availability::{available_cars_in, check_range, conflicts_in};
use super::{Availability, Engine, EngineError};

/// A car offered for a date range, with the live bookings it would overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarOffer {
    pub car: Car,
    pub overlapping: usize,
}

impl Engine {
    pub async fn cars(&self) -> Vec<Car> {
        self.state.read().await.cars.clone()
    }

    pub async fn car(&self, id: Ulid) -> Result<Car, EngineError> {
        self.state
            .read()
            .await
            .car(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// All bookings, newest checkin first; optionally only those of one car.
    pub async fn bookings(&self, car_id: Option<Ulid>) -> Vec<Booking> {
        let guard = self.state.read().await;
        let mut out: Vec<Booking> = guard
            .bookings
            .iter()
            .filter(|b| car_id.is_none_or(|id| b.car_id == id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.start_date.cmp(&a.start_date).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn expenses(&self) -> Vec<Expense> {
        let mut out = self.state.read().await.expenses.clone();
        out.sort_by(|a, b| b.date.cmp(&a.date).then(a.id.cmp(&b.id)));
        out
    }

    /// Service dates per car, soonest next service first. Cars without a
    /// scheduled service sort last.
    pub async fn maintenance_schedule(&self) -> Vec<MaintenanceEntry> {
        let guard = self.state.read().await;
        let mut out: Vec<MaintenanceEntry> = guard
            .cars
            .iter()
            .map(|c| MaintenanceEntry {
                car_id: c.id,
                name: c.name.clone(),
                last_service_date: c.last_service_date,
                next_service_date: c.next_service_date,
            })
            .collect();
        out.sort_by_key(|e| (e.next_service_date.is_none(), e.next_service_date, e.car_id));
        out
    }

    /// Income counts every booking that was not rejected. Totals saturate
    /// at the `i64` bounds.
    pub async fn summary(&self) -> Summary {
        let guard = self.state.read().await;
        let total_income = guard
            .bookings
            .iter()
            .filter(|b| b.status != BookingStatus::Rejected)
            .fold(0i64, |sum, b| sum.saturating_add(b.amount_paid));
        let total_expenses = guard
            .expenses
            .iter()
            .fold(0i64, |sum, e| sum.saturating_add(e.amount));
        Summary {
            total_income,
            total_expenses,
            profit: total_income.saturating_sub(total_expenses),
        }
    }

    pub async fn check_availability(
        &self,
        car_id: Ulid,
        start: Day,
        end: Day,
    ) -> Result<Availability, EngineError> {
        let range = DateRange::new(start, end)?;
        let guard = self.state.read().await;
        if guard.car(&car_id).is_none() {
            return Err(EngineError::NotFound(car_id));
        }
        Ok(check_range(car_id, &range, &guard.bookings))
    }

    /// Cars that can be offered for `[start, end)`, with how many live
    /// bookings each would overlap.
    pub async fn available_cars(&self, start: Day, end: Day) -> Result<Vec<CarOffer>, EngineError> {
        let range = DateRange::new(start, end)?;
        let guard = self.state.read().await;
        Ok(available_cars_in(&guard.cars, &range, &guard.bookings)
            .map(|car| CarOffer {
                car: car.clone(),
                overlapping: conflicts_in(car.id, &range, &guard.bookings).count(),
            })
            .collect())
    }

    pub async fn has_users(&self) -> bool {
        !self.state.read().await.users.is_empty()
    }

    pub async fn password_for(&self, username: &str) -> Option<String> {
        self.state
            .read()
            .await
            .users
            .iter()
            .find(|u| u.username == username)
            .map(|u| u.password.clone())
    }
}
