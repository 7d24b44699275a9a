// src/notify.rs
//
// Fan-out of payment and cycle events to email, WhatsApp and the in-app
// feed. Dispatch is fire-and-forget: failures are logged and never bubble
// back into the ledger write path.

use reqwest::Client;
use serde_json::json;
use sqlx::PgPool;

use crate::db;
use crate::models::{Cycle, Payment, PaymentStatus, User};

#[derive(Clone)]
pub struct Notifier {
    http: Client,
    pool: PgPool,
    email_api_url: String,
    email_api_key: String,
    email_from: String,
    whatsapp_api_url: String,
    whatsapp_token: String,
}

impl Notifier {
    pub fn from_env(pool: PgPool) -> Self {
        Self {
            http: Client::new(),
            pool,
            email_api_url: std::env::var("EMAIL_API_URL").unwrap_or_default(),
            email_api_key: std::env::var("EMAIL_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "GIAS Pagos <pagos@gias.mx>".to_string()),
            whatsapp_api_url: std::env::var("WHATSAPP_API_URL").unwrap_or_default(),
            whatsapp_token: std::env::var("WHATSAPP_TOKEN").unwrap_or_default(),
        }
    }

    /// Status change after a submission or an admin decision.
    pub async fn payment_status_changed(&self, user: &User, payment: &Payment, cycle: &Cycle) {
        let state_text = match payment.status {
            PaymentStatus::Pending => "está pendiente de revisión",
            PaymentStatus::Approved => "ha sido aprobado",
            PaymentStatus::Rejected => "ha sido rechazado",
        };

        let subject = format!("Estado de Pago - {}", payment.status.as_str());
        let html = format!(
            "<h2>Hola {},</h2>\
             <p>Tu pago por ${:.2} {}.</p>\
             <ul>\
               <li>Fecha de pago: {}</li>\
               <li>Tipo de tanda: {}</li>\
               {}\
             </ul>\
             {}",
            user.name,
            payment.amount,
            state_text,
            payment.due_date.format("%Y-%m-%d"),
            cycle.cadence.as_str(),
            if payment.late {
                "<li>Pago con atraso</li>"
            } else {
                ""
            },
            if payment.status == PaymentStatus::Rejected {
                "<p>Por favor, contacta al administrador para más información.</p>"
            } else {
                ""
            },
        );

        self.send_email(user, &subject, &html).await;
        self.send_whatsapp(
            user,
            &format!(
                "Tu pago por ${:.2} {}. Tipo: {}.{}",
                payment.amount,
                state_text,
                cycle.cadence.as_str(),
                if payment.late { " Pago con atraso." } else { "" }
            ),
        )
        .await;
        self.record(
            user.id,
            "payment_status",
            &format!("Estado de tu pago: {}", payment.status.as_str()),
            &format!("Tu pago por ${:.2} {}.", payment.amount, state_text),
        )
        .await;
    }

    /// Extra notice when a payment came in after its due date.
    pub async fn late_payment(&self, user: &User, payment: &Payment, cycle: &Cycle) {
        let subject = "Aviso de Pago Atrasado - GIAS";
        let html = format!(
            "<h2>Hola {},</h2>\
             <p>Tu pago de la tanda tipo {} está atrasado.</p>\
             <ul>\
               <li>Monto pendiente: ${:.2}</li>\
               <li>Fecha programada original: {}</li>\
             </ul>\
             <p>Por favor, realiza tu pago lo antes posible para evitar mayores penalizaciones.</p>",
            user.name,
            cycle.cadence.as_str(),
            payment.amount,
            payment.due_date.format("%Y-%m-%d"),
        );

        self.send_email(user, subject, &html).await;
        self.record(
            user.id,
            "late_payment",
            "Aviso de Pago Atrasado",
            &format!(
                "Tu pago de ${:.2} está atrasado. Fecha original: {}.",
                payment.amount,
                payment.due_date.format("%Y-%m-%d")
            ),
        )
        .await;
    }

    /// Reminder sent when an admin defines the start date, or on demand.
    pub async fn payment_reminder(
        &self,
        user: &User,
        cycle: &Cycle,
        due_date: chrono::NaiveDate,
    ) {
        let subject = "Recordatorio de Pago - GIAS";
        let html = format!(
            "<h2>Hola {},</h2>\
             <p>Te recordamos que tu próximo pago está programado para el {}.</p>\
             <ul>\
               <li>Monto a pagar: ${:.2}</li>\
               <li>Tipo de tanda: {}</li>\
             </ul>\
             <p>Por favor, asegúrate de realizar tu pago a tiempo para evitar penalizaciones.</p>",
            user.name,
            due_date.format("%Y-%m-%d"),
            cycle.amount,
            cycle.cadence.as_str(),
        );

        self.send_email(user, subject, &html).await;
        self.record(
            user.id,
            "payment_reminder",
            "Recordatorio de Pago",
            &format!(
                "Tu próximo pago está programado para el {}. Monto: ${:.2}. Tipo: {}.",
                due_date.format("%Y-%m-%d"),
                cycle.amount,
                cycle.cadence.as_str()
            ),
        )
        .await;
    }

    async fn send_email(&self, user: &User, subject: &str, html: &str) {
        if self.email_api_url.is_empty() {
            log::debug!("email provider not configured, skipping '{subject}'");
            return;
        }

        let result = self
            .http
            .post(&self.email_api_url)
            .header("Authorization", format!("Bearer {}", self.email_api_key))
            .json(&json!({
                "from": self.email_from,
                "to": user.email,
                "subject": subject,
                "html": html,
            }))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                log::info!("email '{}' sent to {}", subject, user.email);
            }
            Ok(resp) => {
                log::error!(
                    "email provider rejected '{}' for {}: status={}",
                    subject,
                    user.email,
                    resp.status()
                );
            }
            Err(e) => log::error!("email send error for {}: {e}", user.email),
        }
    }

    async fn send_whatsapp(&self, user: &User, body: &str) {
        let Some(phone) = user.phone.as_deref() else {
            return;
        };
        if self.whatsapp_api_url.is_empty() {
            log::debug!("whatsapp provider not configured, skipping message to {phone}");
            return;
        }

        let result = self
            .http
            .post(&self.whatsapp_api_url)
            .header("Authorization", format!("Bearer {}", self.whatsapp_token))
            .json(&json!({ "to": phone, "body": body }))
            .send()
            .await;

        if let Err(e) = result {
            log::error!("whatsapp send error for {phone}: {e}");
        }
    }

    /// Every dispatch leaves an in-app copy users can read back later.
    async fn record(&self, user_id: i32, kind: &str, title: &str, message: &str) {
        if let Err(e) =
            db::insert_notification(&self.pool, user_id, kind, title, message, "in_app").await
        {
            log::error!("in-app notification insert error for user {user_id}: {e}");
        }
    }
}
