use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Payload;
use crate::{NotifierError, Result};

/// 预订确认邮件任务名
pub const BOOKING_CONFIRMATION_TASK: &str = "listings.send_booking_confirmation_email";

/// 支付确认邮件任务名
pub const PAYMENT_CONFIRMATION_TASK: &str = "listings.send_payment_confirmation_email";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// 预订快照
///
/// 在入队瞬间从预订记录复制所需字段，之后预订记录的变化不会影响已入队的任务。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSnapshot {
    pub booking_id: i64,
    pub user_email: String,
    pub listing_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: Option<u32>,
}

impl BookingSnapshot {
    /// 基础校验：邮箱与房源名非空，退房日期不早于入住日期
    pub fn validate(&self) -> Result<()> {
        validate_common(&self.user_email, &self.listing_name)?;
        validate_stay(self.check_in, self.check_out)
    }

    pub fn to_payload(&self) -> Payload {
        Payload::new()
            .with("booking_id", self.booking_id)
            .with("user_email", self.user_email.as_str())
            .with("listing_name", self.listing_name.as_str())
            .with("check_in_date", self.check_in.format(DATE_FORMAT).to_string())
            .with("check_out_date", self.check_out.format(DATE_FORMAT).to_string())
            .with("guests", self.guests)
    }

    pub fn from_payload(payload: &Payload) -> Result<Self> {
        let guests = payload
            .optional_i64("guests")?
            .map(|g| {
                u32::try_from(g)
                    .map_err(|_| NotifierError::InvalidPayload(format!("无效的入住人数: {g}")))
            })
            .transpose()?;

        Ok(Self {
            booking_id: payload.require_i64("booking_id")?,
            user_email: payload.require_str("user_email")?.to_string(),
            listing_name: payload.require_str("listing_name")?.to_string(),
            check_in: parse_date(payload, "check_in_date")?,
            check_out: parse_date(payload, "check_out_date")?,
            guests,
        })
    }
}

/// 支付快照，支付校验成功后用于发送支付确认邮件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSnapshot {
    /// 预订的对外引用号（UUID字符串）
    pub booking_reference: String,
    pub user_email: String,
    pub listing_name: String,
    /// 金额以十进制字符串保存，避免浮点误差
    pub amount: String,
    pub currency: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl PaymentSnapshot {
    pub fn validate(&self) -> Result<()> {
        validate_common(&self.user_email, &self.listing_name)?;
        validate_stay(self.check_in, self.check_out)?;

        if self.booking_reference.trim().is_empty() {
            return Err(NotifierError::InvalidPayload("预订引用号不能为空".to_string()));
        }
        if !is_decimal(&self.amount) {
            return Err(NotifierError::InvalidPayload(format!(
                "无效的支付金额: {}",
                self.amount
            )));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(NotifierError::InvalidPayload(format!(
                "无效的币种: {}",
                self.currency
            )));
        }
        Ok(())
    }

    pub fn to_payload(&self) -> Payload {
        Payload::new()
            .with("booking_id", self.booking_reference.as_str())
            .with("user_email", self.user_email.as_str())
            .with("listing_name", self.listing_name.as_str())
            .with("amount", self.amount.as_str())
            .with("currency", self.currency.as_str())
            .with("check_in", self.check_in.format(DATE_FORMAT).to_string())
            .with("check_out", self.check_out.format(DATE_FORMAT).to_string())
    }

    pub fn from_payload(payload: &Payload) -> Result<Self> {
        Ok(Self {
            booking_reference: payload.require_str("booking_id")?.to_string(),
            user_email: payload.require_str("user_email")?.to_string(),
            listing_name: payload.require_str("listing_name")?.to_string(),
            amount: payload.require_str("amount")?.to_string(),
            currency: payload.require_str("currency")?.to_string(),
            check_in: parse_date(payload, "check_in")?,
            check_out: parse_date(payload, "check_out")?,
        })
    }
}

fn validate_common(user_email: &str, listing_name: &str) -> Result<()> {
    if user_email.trim().is_empty() || !user_email.contains('@') {
        return Err(NotifierError::InvalidPayload(format!(
            "无效的用户邮箱: {user_email:?}"
        )));
    }
    if listing_name.trim().is_empty() {
        return Err(NotifierError::InvalidPayload("房源名称不能为空".to_string()));
    }
    Ok(())
}

fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<()> {
    if check_out < check_in {
        return Err(NotifierError::InvalidPayload(format!(
            "退房日期 {check_out} 早于入住日期 {check_in}"
        )));
    }
    Ok(())
}

fn parse_date(payload: &Payload, key: &str) -> Result<NaiveDate> {
    let raw = payload.require_str(key)?;
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| NotifierError::InvalidPayload(format!("参数 {key} 不是ISO日期 ({raw}): {e}")))
}

fn is_decimal(s: &str) -> bool {
    let mut parts = s.splitn(2, '.');
    let int_part = parts.next().unwrap_or_default();
    let frac_part = parts.next();

    !int_part.is_empty()
        && int_part.chars().all(|c| c.is_ascii_digit())
        && frac_part.map_or(true, |f| !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()))
}
