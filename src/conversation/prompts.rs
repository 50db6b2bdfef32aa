//! Scripted replies. Clients match on these strings, so they are fixed.

use crate::channels::{OutgoingResponse, ReplyMarkup};
use crate::conversation::severity::Severity;

pub const SEVERITY_PROMPT: &str = concat!(
    "¡Hola! Este bot te ayudará a informar de una incidencia.\n\n",
    "Escribe /cancelar para parar en cualquier momento.\n",
    "(Ojo a la barra «/» al introducir comandos)",
    "\n\n",
    "Antes de empezar, asegúrate de que has reiniciado el ordenador o ",
    "has cerrado sesión **por completo** y vuelto a hacer __login__ si eres ",
    "usuario de escritorio remoto. Si el problema es con Murano, ",
    "reinícialo también y vuelve a intentar la operación.\n",
    "Si nada de esto funciona...\n\n",
    "¿Cómo de urgente e importante es la incidencia?\n\n",
    "  - Crítica: No puedo trabajar hasta que se resuelva.\n",
    "      Por ejemplo: El PC no arranca, no tengo correo...\n",
    "  - Alta: La incidencia es urgente, debería ser atendida hoy mismo.\n",
    "      Por ejemplo: Tengo un virus, hay un albarán problemático...\n",
    "  - Media: Es un problema importante, aunque no me bloquea.\n",
    "      Por ejemplo: Hay un error de existencias, Internet va lento...\n",
    "  - Baja: Puede esperar, pero necesito notificarlo.\n",
    "      Por ejemplo: La copia de seguridad ha fallado, el móvil se me reinicia...\n",
    "  - Otro: No es una incidencia. Necesito hablar con alguien de IT.\n",
);

pub const ATTACHMENT_PROMPT: &str = concat!(
    "Ya veo. ¿Puedes enviarme una captura de ",
    "pantalla o una foto del error?\n",
    "Escribe /saltar si quieres saltarte este paso.",
    "\n\n",
    "(Si adjuntas una imagen, marca «enviar como foto»)",
);

pub const DESCRIPTION_PROMPT: &str = concat!(
    "¡Genial! Ahora descríbeme el problema con todos",
    "los detalles que puedas o escribe /saltar.",
    "Cuantos más detalles proporciones, más rápido ",
    "podré ayudarte.",
);

/// Sent instead of [`DESCRIPTION_PROMPT`] when the screenshot was skipped.
pub const DESCRIPTION_PROMPT_NO_ATTACHMENT: &str = concat!(
    "Necesitaré que te esfuerces en la descripción ",
    "del problema. Puedes saltar este paso tamién ",
    "escribiendo /saltar.\n\n",
    "Cuéntame todo lo que puedas acerca de la ",
    "incidencia.",
);

pub const ACKNOWLEDGEMENT: &str = concat!(
    "¡Gracias! Me podré en contacto contigo lo antes",
    " posible.",
);

pub const FAREWELL: &str = concat!(
    "Adiós. Puedes volver a empezar cuando quieras ",
    "escribiendo /empezar.",
);

/// The five severity labels as a single keyboard row.
pub fn severity_keyboard() -> ReplyMarkup {
    ReplyMarkup::Choices {
        rows: vec![
            Severity::ALL
                .iter()
                .map(|s| s.label().to_string())
                .collect(),
        ],
        one_time: true,
    }
}

pub fn severity_prompt() -> OutgoingResponse {
    OutgoingResponse::text(SEVERITY_PROMPT).with_markup(severity_keyboard())
}

pub fn attachment_prompt() -> OutgoingResponse {
    OutgoingResponse::text(ATTACHMENT_PROMPT).with_markup(ReplyMarkup::Remove)
}

pub fn description_prompt() -> OutgoingResponse {
    OutgoingResponse::text(DESCRIPTION_PROMPT)
}

pub fn description_prompt_no_attachment() -> OutgoingResponse {
    OutgoingResponse::text(DESCRIPTION_PROMPT_NO_ATTACHMENT)
}

pub fn acknowledgement() -> OutgoingResponse {
    OutgoingResponse::text(ACKNOWLEDGEMENT)
}

pub fn farewell() -> OutgoingResponse {
    OutgoingResponse::text(FAREWELL).with_markup(ReplyMarkup::Remove)
}
